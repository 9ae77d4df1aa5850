//! TCP transport implementation.
//!
//! One accept loop, one read task per connection and one task that
//! processes removals. The connection table is shared between them and the
//! write path; nothing outside this module holds a socket.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use crate::event::ConnectionEvent;
use crate::framer::{NullTermCodec, Token, DEFAULT_MAX_FRAME_SIZE};
use crate::traits::{ConnectionId, Outbound, TransportError};

/// Added to the read timeout so a heartbeat sent right on time still lands.
pub const READ_GRACE: Duration = Duration::from_millis(1000);

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Capacity of the internal removal channel.
const REMOVAL_BUFFER: usize = 64;

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Address to bind to, `host:port`.
    pub bind_addr: String,
    /// Close connections that send nothing for this long (plus
    /// [`READ_GRACE`]). `None` disables the deadline.
    pub read_timeout: Option<Duration>,
    /// Delay between a disconnect request and the socket closing.
    pub shutdown_delay: Duration,
    /// Longest a single write may wait on a client that is not reading.
    /// A connection whose write times out is closed.
    pub write_timeout: Duration,
    /// Largest unterminated frame accepted before the connection is dropped.
    pub max_frame_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:61613".to_string(),
            read_timeout: None,
            shutdown_delay: Duration::from_millis(500),
            write_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// An open TCP connection.
struct Connection {
    remote_addr: SocketAddr,
    writer: Mutex<FramedWrite<OwnedWriteHalf, NullTermCodec>>,
    close: watch::Sender<bool>,
}

/// State shared by the accept loop, read tasks and removal handler.
struct Shared {
    config: TcpConfig,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl Shared {
    fn lookup(&self, id: &ConnectionId) -> Result<Arc<Connection>, TransportError> {
        self.connections
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::NotFound(id.clone()))
    }
}

/// Owns the listener and every accepted connection.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Bind the listener and start accepting.
    ///
    /// Events for every connection are pushed onto `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(
        config: TcpConfig,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
        let local_addr = listener.local_addr()?;

        info!("TCP transport listening on {}", local_addr);

        let shared = Arc::new(Shared {
            config,
            connections: DashMap::new(),
            events,
        });
        let (stop, stop_rx) = watch::channel(false);
        let (removals_tx, removals_rx) = mpsc::channel(REMOVAL_BUFFER);

        tokio::spawn(handle_removals(Arc::clone(&shared), removals_rx));
        tokio::spawn(accept_loop(listener, Arc::clone(&shared), removals_tx, stop_rx));

        Ok(Arc::new(Self {
            shared,
            local_addr,
            stop,
        }))
    }

    /// The address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Check whether a connection is open.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.shared.connections.contains_key(id)
    }

    /// Remote address of a connection.
    #[must_use]
    pub fn remote_addr(&self, id: &ConnectionId) -> Option<SocketAddr> {
        self.shared.connections.get(id).map(|c| c.remote_addr)
    }

    /// Stop accepting new connections. Open connections are left alone.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

#[async_trait]
impl Outbound for ConnectionManager {
    async fn write(&self, id: &ConnectionId, data: Bytes) -> Result<(), TransportError> {
        let connection = self.shared.lookup(id)?;
        let written = tokio::time::timeout(self.shared.config.write_timeout, async {
            let mut writer = connection.writer.lock().await;
            writer.send(data).await
        })
        .await;

        match written {
            Ok(result) => result,
            Err(_) => {
                // A partial frame may be on the wire, the stream is unusable
                warn!(connection = %id, "Write timed out, closing connection");
                connection.close.send_replace(true);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn disconnect(&self, id: &ConnectionId) -> Result<(), TransportError> {
        let connection = self.shared.lookup(id)?;
        let delay = self.shared.config.shutdown_delay;
        let id = id.clone();

        debug!(connection = %id, delay_ms = delay.as_millis() as u64, "Disconnect scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut writer = connection.writer.lock().await;
                if let Err(e) = writer.get_mut().shutdown().await {
                    debug!(connection = %id, error = %e, "Socket shutdown failed");
                }
            }
            connection.close.send_replace(true);
        });

        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    removals: mpsc::Sender<ConnectionId>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.changed() => {
                info!("TCP listener stopped");
                return;
            }
        };

        match accepted {
            Ok((stream, addr)) => {
                if !register(stream, addr, &shared, &removals).await {
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Register an accepted socket and start its read task.
///
/// Returns `false` once the engine has gone away.
async fn register(
    stream: TcpStream,
    addr: SocketAddr,
    shared: &Arc<Shared>,
    removals: &mpsc::Sender<ConnectionId>,
) -> bool {
    let id = ConnectionId::generate();
    let (read_half, write_half) = stream.into_split();
    let (close, close_rx) = watch::channel(false);

    let connection = Connection {
        remote_addr: addr,
        writer: Mutex::new(FramedWrite::new(
            write_half,
            NullTermCodec::new(shared.config.max_frame_size),
        )),
        close,
    };
    shared.connections.insert(id.clone(), Arc::new(connection));

    info!(connection = %id, remote = %addr, "New connection");

    if shared
        .events
        .send(ConnectionEvent::NewConnection(id.clone()))
        .await
        .is_err()
    {
        warn!("Event channel closed, no longer accepting");
        return false;
    }

    tokio::spawn(read_loop(
        id,
        read_half,
        Arc::clone(shared),
        removals.clone(),
        close_rx,
    ));
    true
}

async fn read_loop(
    id: ConnectionId,
    read_half: OwnedReadHalf,
    shared: Arc<Shared>,
    removals: mpsc::Sender<ConnectionId>,
    mut close: watch::Receiver<bool>,
) {
    let mut frames = FramedRead::new(
        read_half,
        NullTermCodec::with_heartbeats(shared.config.max_frame_size),
    );
    let deadline = shared.config.read_timeout.map(|t| t + READ_GRACE);

    loop {
        let next = tokio::select! {
            next = next_token(&mut frames, deadline) => next,
            _ = close.changed() => {
                debug!(connection = %id, "Closed by server");
                break;
            }
        };

        match next {
            Ok(Some(Token::Heartbeat)) => {
                trace!(connection = %id, "Heartbeat");
            }
            Ok(Some(Token::Frame(data))) => {
                let mut frame = BytesMut::with_capacity(data.len() + 1);
                frame.extend_from_slice(&data);
                frame.put_u8(0);

                let event = ConnectionEvent::Frame {
                    id: id.clone(),
                    data: frame.freeze(),
                };
                if shared.events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(connection = %id, "Stream ended");
                break;
            }
            Err(TransportError::Timeout) => {
                debug!(connection = %id, "Read deadline expired");
                break;
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "Read failed");
                break;
            }
        }
    }

    if removals.send(id).await.is_err() {
        error!("Removal channel closed");
    }
}

async fn next_token(
    frames: &mut FramedRead<OwnedReadHalf, NullTermCodec>,
    deadline: Option<Duration>,
) -> Result<Option<Token>, TransportError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, frames.next())
            .await
            .map_err(|_| TransportError::Timeout)?
            .transpose(),
        None => frames.next().await.transpose(),
    }
}

async fn handle_removals(shared: Arc<Shared>, mut removals: mpsc::Receiver<ConnectionId>) {
    while let Some(id) = removals.recv().await {
        shared.connections.remove(&id);
        info!(connection = %id, "Connection closed");

        if shared
            .events
            .send(ConnectionEvent::ConnectionClosed(id))
            .await
            .is_err()
        {
            break;
        }
    }
}
