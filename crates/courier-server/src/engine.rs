//! Protocol engine.
//!
//! Consumes connection events one at a time, parses frames and applies
//! them to the subscription registry, the transaction registry and the
//! queue store. Replies (CONNECTED, RECEIPT, ERROR) are written back
//! through [`Outbound`].

use crate::metrics::{self, error_kind, BrokerStats};
use courier_core::{
    prepare_message, Store, StoreError, SubscriptionError, SubscriptionRegistry, TransactionError,
    TransactionRegistry,
};
use courier_protocol::{
    codec, header, negotiate, Command, Frame, ProtocolError, PROTOCOL_VERSION,
};
use courier_transport::{ConnectionEvent, ConnectionId, Outbound, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors raised while handling a client frame.
///
/// Every variant except [`EngineError::Transport`] is reported to the
/// client as an ERROR frame.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A header the command requires is absent.
    #[error("missing required header {header} on {command}")]
    MissingHeader {
        /// Command of the offending frame.
        command: Command,
        /// Name of the missing header.
        header: &'static str,
    },

    /// SUBSCRIBE to a destination that does not exist, without `create`.
    #[error("no such destination {0}")]
    UnknownDestination(String),

    /// The client does not accept the protocol version the server speaks.
    #[error("unsupported protocol version")]
    UnsupportedVersion,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Host name advertised in CONNECTED.
    pub host: String,
    /// Heartbeat interval advertised in CONNECTED, in milliseconds.
    pub heartbeat_ms: u64,
    /// On COMMIT, keep only the last frame per destination.
    pub collapse_commits: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            heartbeat_ms: 0,
            collapse_commits: false,
        }
    }
}

/// What a handled frame asks the engine to send back.
#[derive(Debug)]
enum Outcome {
    /// Write this frame instead of a receipt.
    Reply(Frame),
    /// Handled; write a receipt if one was requested.
    Done,
    /// Nothing to do and nothing to send.
    Ignored,
}

/// The protocol engine.
pub struct Engine {
    outbound: Arc<dyn Outbound>,
    store: Arc<dyn Store>,
    subscriptions: Arc<SubscriptionRegistry>,
    transactions: TransactionRegistry,
    stats: Arc<BrokerStats>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine over shared broker state.
    #[must_use]
    pub fn new(
        outbound: Arc<dyn Outbound>,
        store: Arc<dyn Store>,
        subscriptions: Arc<SubscriptionRegistry>,
        stats: Arc<BrokerStats>,
        config: EngineConfig,
    ) -> Self {
        Self {
            outbound,
            store,
            subscriptions,
            transactions: TransactionRegistry::new(),
            stats,
            config,
        }
    }

    /// Process events until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<ConnectionEvent>) {
        info!("Engine started");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Engine stopped, event channel closed");
    }

    /// Apply one connection event.
    pub async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::NewConnection(id) => {
                debug!(connection = %id, "Client connected");
                metrics::record_connection();
            }
            ConnectionEvent::Frame { id, data } => {
                self.handle_frame(&id, &data).await;
            }
            ConnectionEvent::ConnectionClosed(id) => {
                let subscriptions = self.subscriptions.unsubscribe_all(id.as_str());
                let transactions = self.transactions.abort_all(id.as_str());
                debug!(
                    connection = %id,
                    subscriptions,
                    transactions,
                    "Client state released"
                );
                metrics::record_disconnection();
                metrics::set_active_subscriptions(self.subscriptions.len());
            }
        }
    }

    async fn handle_frame(&self, id: &ConnectionId, raw: &[u8]) {
        let frame = match codec::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %id, error = %e, "Unparseable frame");
                self.stats.inc_error(error_kind::PARSE);
                self.send(id, &Frame::error(e.to_string(), raw)).await;
                return;
            }
        };

        self.stats.inc_received();
        let receipt = frame.header(header::RECEIPT).map(str::to_string);

        match self.dispatch(id, frame).await {
            Ok(Outcome::Reply(reply)) => self.send(id, &reply).await,
            Ok(Outcome::Done) => {
                if let Some(receipt) = receipt {
                    self.send(id, &Frame::receipt(receipt)).await;
                }
            }
            Ok(Outcome::Ignored) => {}
            Err(EngineError::Transport(e)) => {
                debug!(connection = %id, error = %e, "Connection gone while handling frame");
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "Frame rejected");
                self.stats.inc_error(error_kind::PROTOCOL);

                let mut error = Frame::error(e.to_string(), raw);
                if matches!(e, EngineError::UnsupportedVersion) {
                    error = error.with_header(header::VERSION, PROTOCOL_VERSION.to_string());
                }
                if let Some(receipt) = receipt {
                    error = error.with_header(header::RECEIPT_ID, receipt);
                }
                self.send(id, &error).await;
            }
        }
    }

    async fn dispatch(&self, id: &ConnectionId, frame: Frame) -> Result<Outcome, EngineError> {
        match frame.command {
            Command::Connect | Command::Stomp => self.connect(&frame),
            Command::Subscribe => self.subscribe(id, &frame),
            Command::Unsubscribe => self.unsubscribe(id, &frame),
            Command::Send => self.publish(id, frame),
            Command::Begin => {
                let tx = required(&frame, header::TRANSACTION)?;
                self.transactions.start(tx, id.as_str())?;
                Ok(Outcome::Done)
            }
            Command::Abort => {
                let tx = required(&frame, header::TRANSACTION)?;
                self.transactions.abort(tx, id.as_str())?;
                Ok(Outcome::Done)
            }
            Command::Commit => self.commit(id, &frame),
            Command::Disconnect => {
                self.outbound.disconnect(id).await?;
                Ok(Outcome::Done)
            }
            // Delivery is fire-and-forget, acknowledgements change nothing
            Command::Ack | Command::Nack => Ok(Outcome::Done),
            Command::Connected | Command::Message | Command::Receipt | Command::Error => {
                debug!(connection = %id, command = %frame.command, "Ignoring server command from client");
                Ok(Outcome::Ignored)
            }
        }
    }

    fn connect(&self, frame: &Frame) -> Result<Outcome, EngineError> {
        let version = match frame.header(header::ACCEPT_VERSION) {
            Some(accepted) => negotiate(accepted).ok_or(EngineError::UnsupportedVersion)?,
            None if frame.command == Command::Stomp => PROTOCOL_VERSION,
            None => return Ok(Outcome::Ignored),
        };

        Ok(Outcome::Reply(Frame::connected(
            version.to_string(),
            self.config.host.clone(),
            self.config.heartbeat_ms,
        )))
    }

    fn subscribe(&self, id: &ConnectionId, frame: &Frame) -> Result<Outcome, EngineError> {
        let sub_id = required(frame, header::ID)?;
        let destination = required(frame, header::DESTINATION)?;

        if !self.store.contains(destination) {
            if frame.header(header::CREATE) != Some("true") {
                return Err(EngineError::UnknownDestination(destination.to_string()));
            }
            self.store.add_destination(destination)?;
            metrics::set_destinations(self.store.destinations().len());
        }

        self.subscriptions.subscribe(id.as_str(), sub_id, destination)?;
        metrics::set_active_subscriptions(self.subscriptions.len());
        Ok(Outcome::Done)
    }

    fn unsubscribe(&self, id: &ConnectionId, frame: &Frame) -> Result<Outcome, EngineError> {
        let sub_id = required(frame, header::ID)?;
        self.subscriptions.unsubscribe(id.as_str(), sub_id)?;
        metrics::set_active_subscriptions(self.subscriptions.len());
        Ok(Outcome::Done)
    }

    fn publish(&self, id: &ConnectionId, frame: Frame) -> Result<Outcome, EngineError> {
        let destination = required(&frame, header::DESTINATION)?.to_string();

        if let Some(tx) = frame.header(header::TRANSACTION).map(str::to_string) {
            self.transactions.add_frame(&tx, id.as_str(), frame)?;
            return Ok(Outcome::Done);
        }

        self.store.enqueue(&destination, prepare_message(&frame))?;
        Ok(Outcome::Done)
    }

    fn commit(&self, id: &ConnectionId, frame: &Frame) -> Result<Outcome, EngineError> {
        let tx_id = required(frame, header::TRANSACTION)?;
        let tx = self.transactions.commit(tx_id, id.as_str())?;

        let mut batch: Vec<(String, Frame)> = Vec::with_capacity(tx.frames.len());
        for buffered in &tx.frames {
            // Buffered only after the destination header was checked
            let Some(destination) = buffered.header(header::DESTINATION) else {
                continue;
            };
            let message = prepare_message(buffered);

            if self.config.collapse_commits {
                if let Some(slot) = batch.iter_mut().find(|(d, _)| d == destination) {
                    slot.1 = message;
                    continue;
                }
            }
            batch.push((destination.to_string(), message));
        }

        debug!(connection = %id, transaction = %tx_id, frames = batch.len(), "Committing");
        self.store.enqueue_tx(batch)?;
        Ok(Outcome::Done)
    }

    async fn send(&self, id: &ConnectionId, frame: &Frame) {
        if let Err(e) = self.outbound.write(id, codec::serialize(frame)).await {
            warn!(connection = %id, command = %frame.command, error = %e, "Write failed");
            self.stats.inc_error(error_kind::WRITE);
        }
    }
}

fn required<'a>(frame: &'a Frame, name: &'static str) -> Result<&'a str, EngineError> {
    frame.header(name).ok_or(EngineError::MissingHeader {
        command: frame.command,
        header: name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use courier_core::MemoryStore;
    use parking_lot::Mutex;

    /// Records writes instead of touching sockets.
    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<(ConnectionId, Bytes)>>,
        disconnects: Mutex<Vec<ConnectionId>>,
    }

    impl Recorder {
        fn frames_for(&self, id: &str) -> Vec<Frame> {
            self.writes
                .lock()
                .iter()
                .filter(|(to, _)| to.as_str() == id)
                .map(|(_, data)| codec::parse(data).unwrap())
                .collect()
        }

        fn last_for(&self, id: &str) -> Frame {
            self.frames_for(id).pop().expect("no frame written")
        }
    }

    #[async_trait]
    impl Outbound for Recorder {
        async fn write(&self, id: &ConnectionId, data: Bytes) -> Result<(), TransportError> {
            self.writes.lock().push((id.clone(), data));
            Ok(())
        }

        async fn disconnect(&self, id: &ConnectionId) -> Result<(), TransportError> {
            self.disconnects.lock().push(id.clone());
            Ok(())
        }
    }

    struct Harness {
        engine: Engine,
        recorder: Arc<Recorder>,
        store: Arc<MemoryStore>,
        subscriptions: Arc<SubscriptionRegistry>,
        stats: Arc<BrokerStats>,
    }

    fn harness_with(config: EngineConfig) -> Harness {
        let recorder = Arc::new(Recorder::default());
        let store = Arc::new(MemoryStore::with_destinations(["/queue/a", "/queue/b"]));
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let stats = Arc::new(BrokerStats::new());
        let engine = Engine::new(
            recorder.clone(),
            store.clone(),
            subscriptions.clone(),
            stats.clone(),
            config,
        );
        Harness {
            engine,
            recorder,
            store,
            subscriptions,
            stats,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineConfig {
            host: "broker.test".to_string(),
            heartbeat_ms: 5000,
            collapse_commits: false,
        })
    }

    impl Harness {
        async fn frame(&self, client: &str, raw: &'static [u8]) {
            self.engine
                .handle_event(ConnectionEvent::Frame {
                    id: ConnectionId::from(client),
                    data: Bytes::from_static(raw),
                })
                .await;
        }

        fn bodies(&self, destination: &str) -> Vec<Bytes> {
            std::iter::from_fn(|| self.store.pop(destination).ok())
                .map(|f| f.body)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_connect_negotiates_version() {
        let h = harness();
        h.frame("c1", b"CONNECT\naccept-version:1.0,1.2\n\n\0").await;

        let reply = h.recorder.last_for("c1");
        assert_eq!(
            codec::serialize(&reply),
            Bytes::from_static(b"CONNECTED\nversion:1.2\nhost:broker.test\nheart-beat:0,5000\n\n\0")
        );
    }

    #[tokio::test]
    async fn test_stomp_without_accept_version() {
        let h = harness();
        h.frame("c1", b"STOMP\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1").command, Command::Connected);
    }

    #[tokio::test]
    async fn test_bare_connect_is_ignored() {
        let h = harness();
        h.frame("c1", b"CONNECT\nreceipt:r\n\n\0").await;
        assert!(h.recorder.frames_for("c1").is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        let h = harness();
        h.frame("c1", b"CONNECT\naccept-version:1.0,1.1\n\n\0").await;

        let reply = h.recorder.last_for("c1");
        assert_eq!(reply.command, Command::Error);
        assert_eq!(reply.header(header::MESSAGE), Some("unsupported protocol version"));
        assert_eq!(reply.header(header::VERSION), Some("1.2"));
    }

    #[tokio::test]
    async fn test_parse_error_reports_original_frame() {
        let h = harness();
        h.frame("c1", b"BOGUS\n\n\0").await;

        let reply = h.recorder.last_for("c1");
        assert_eq!(reply.command, Command::Error);
        assert_eq!(reply.header(header::MESSAGE), Some("Invalid command: BOGUS"));
        assert_eq!(&reply.body[..], b"Original frame: BOGUS\n\n");
        assert_eq!(h.stats.snapshot().errors, 1);
        assert_eq!(h.stats.snapshot().received, 0);
    }

    #[tokio::test]
    async fn test_subscribe_with_receipt() {
        let h = harness();
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/a\nreceipt:r-1\n\n\0").await;

        let reply = h.recorder.last_for("c1");
        assert_eq!(reply, Frame::receipt("r-1"));
        assert_eq!(h.subscriptions.clients_by_destination("/queue/a").len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_without_receipt_is_silent() {
        let h = harness();
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/a\n\n\0").await;
        assert!(h.recorder.frames_for("c1").is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_missing_headers() {
        let h = harness();
        h.frame("c1", b"SUBSCRIBE\ndestination:/queue/a\n\n\0").await;
        assert_eq!(
            h.recorder.last_for("c1").header(header::MESSAGE),
            Some("missing required header id on SUBSCRIBE")
        );

        h.frame("c1", b"SUBSCRIBE\nid:1\nreceipt:r-2\n\n\0").await;
        let reply = h.recorder.last_for("c1");
        assert_eq!(
            reply.header(header::MESSAGE),
            Some("missing required header destination on SUBSCRIBE")
        );
        assert_eq!(reply.header(header::RECEIPT_ID), Some("r-2"));
        assert!(h.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_unknown_destination() {
        let h = harness();
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/new\n\n\0").await;

        let reply = h.recorder.last_for("c1");
        assert_eq!(reply.command, Command::Error);
        assert_eq!(reply.header(header::MESSAGE), Some("no such destination /queue/new"));
        assert!(!h.store.contains("/queue/new"));
    }

    #[tokio::test]
    async fn test_subscribe_create() {
        let h = harness();
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/new\ncreate:true\n\n\0").await;

        assert!(h.recorder.frames_for("c1").is_empty());
        assert!(h.store.contains("/queue/new"));
        assert_eq!(h.subscriptions.clients_by_destination("/queue/new").len(), 1);

        // Existing destination with create is a plain subscribe
        h.frame("c2", b"SUBSCRIBE\nid:1\ndestination:/queue/new\ncreate:true\n\n\0").await;
        assert!(h.recorder.frames_for("c2").is_empty());
        assert_eq!(h.subscriptions.clients_by_destination("/queue/new").len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_subscription() {
        let h = harness();
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/a\n\n\0").await;
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/b\n\n\0").await;

        assert_eq!(h.recorder.last_for("c1").command, Command::Error);
        assert_eq!(h.subscriptions.len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let h = harness();
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/a\n\n\0").await;
        h.frame("c1", b"UNSUBSCRIBE\nid:1\nreceipt:u\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1"), Frame::receipt("u"));
        assert!(h.subscriptions.is_empty());

        h.frame("c1", b"UNSUBSCRIBE\nid:1\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1").command, Command::Error);

        h.frame("c1", b"UNSUBSCRIBE\n\n\0").await;
        assert_eq!(
            h.recorder.last_for("c1").header(header::MESSAGE),
            Some("missing required header id on UNSUBSCRIBE")
        );
    }

    #[tokio::test]
    async fn test_send_enqueues_message() {
        let h = harness();
        h.frame("c1", b"SEND\ndestination:/queue/a\nreceipt:s\n\nhello\0").await;

        assert_eq!(h.recorder.last_for("c1"), Frame::receipt("s"));
        let message = h.store.pop("/queue/a").unwrap();
        assert_eq!(message.command, Command::Message);
        assert_eq!(&message.body[..], b"hello");
        assert!(message.header(header::MESSAGE_ID).is_some());
        assert_eq!(h.stats.snapshot().received, 1);
    }

    #[tokio::test]
    async fn test_send_errors() {
        let h = harness();
        h.frame("c1", b"SEND\n\nhello\0").await;
        assert_eq!(
            h.recorder.last_for("c1").header(header::MESSAGE),
            Some("missing required header destination on SEND")
        );

        h.frame("c1", b"SEND\ndestination:/queue/missing\n\nhello\0").await;
        assert_eq!(
            h.recorder.last_for("c1").header(header::MESSAGE),
            Some("no such destination /queue/missing")
        );

        h.frame("c1", b"SEND\ndestination:/queue/a\ntransaction:nope\n\nhello\0").await;
        assert_eq!(h.recorder.last_for("c1").command, Command::Error);
        assert_eq!(h.store.len("/queue/a"), Ok(0));
    }

    #[tokio::test]
    async fn test_transaction_commit() {
        let h = harness();
        h.frame("c1", b"BEGIN\ntransaction:t1\nreceipt:b\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1"), Frame::receipt("b"));

        h.frame("c1", b"SEND\ndestination:/queue/a\ntransaction:t1\n\none\0").await;
        h.frame("c1", b"SEND\ndestination:/queue/a\ntransaction:t1\n\ntwo\0").await;
        h.frame("c1", b"SEND\ndestination:/queue/b\ntransaction:t1\n\nthree\0").await;
        assert_eq!(h.store.len("/queue/a"), Ok(0));

        h.frame("c1", b"COMMIT\ntransaction:t1\nreceipt:c\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1"), Frame::receipt("c"));
        assert_eq!(h.bodies("/queue/a"), vec![Bytes::from("one"), Bytes::from("two")]);
        assert_eq!(h.bodies("/queue/b"), vec![Bytes::from("three")]);

        h.frame("c1", b"COMMIT\ntransaction:t1\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1").command, Command::Error);
    }

    #[tokio::test]
    async fn test_transaction_commit_collapsed() {
        let h = harness_with(EngineConfig {
            collapse_commits: true,
            ..EngineConfig::default()
        });
        h.frame("c1", b"BEGIN\ntransaction:t1\n\n\0").await;
        h.frame("c1", b"SEND\ndestination:/queue/a\ntransaction:t1\n\none\0").await;
        h.frame("c1", b"SEND\ndestination:/queue/b\ntransaction:t1\n\nthree\0").await;
        h.frame("c1", b"SEND\ndestination:/queue/a\ntransaction:t1\n\ntwo\0").await;
        h.frame("c1", b"COMMIT\ntransaction:t1\n\n\0").await;

        assert_eq!(h.bodies("/queue/a"), vec![Bytes::from("two")]);
        assert_eq!(h.bodies("/queue/b"), vec![Bytes::from("three")]);
    }

    #[tokio::test]
    async fn test_commit_to_missing_destination_enqueues_nothing() {
        let h = harness();
        h.frame("c1", b"BEGIN\ntransaction:t1\n\n\0").await;
        h.frame("c1", b"SEND\ndestination:/queue/a\ntransaction:t1\n\none\0").await;
        h.frame("c1", b"SEND\ndestination:/queue/gone\ntransaction:t1\n\ntwo\0").await;
        h.frame("c1", b"COMMIT\ntransaction:t1\n\n\0").await;

        assert_eq!(
            h.recorder.last_for("c1").header(header::MESSAGE),
            Some("no such destination /queue/gone")
        );
        assert_eq!(h.store.len("/queue/a"), Ok(0));
    }

    #[tokio::test]
    async fn test_transaction_abort() {
        let h = harness();
        h.frame("c1", b"BEGIN\ntransaction:t1\n\n\0").await;
        h.frame("c1", b"BEGIN\ntransaction:t1\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1").command, Command::Error);

        h.frame("c1", b"SEND\ndestination:/queue/a\ntransaction:t1\n\none\0").await;
        h.frame("c1", b"ABORT\ntransaction:t1\nreceipt:a\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1"), Frame::receipt("a"));

        h.frame("c1", b"COMMIT\ntransaction:t1\n\n\0").await;
        assert_eq!(h.recorder.last_for("c1").command, Command::Error);
        assert_eq!(h.store.len("/queue/a"), Ok(0));

        h.frame("c1", b"ABORT\n\n\0").await;
        assert_eq!(
            h.recorder.last_for("c1").header(header::MESSAGE),
            Some("missing required header transaction on ABORT")
        );
    }

    #[tokio::test]
    async fn test_transactions_are_scoped_per_client() {
        let h = harness();
        h.frame("c1", b"BEGIN\ntransaction:t1\n\n\0").await;
        h.frame("c2", b"BEGIN\ntransaction:t1\n\n\0").await;
        assert!(h.recorder.frames_for("c2").is_empty());

        h.frame("c2", b"COMMIT\ntransaction:t1\n\n\0").await;
        h.frame("c2", b"COMMIT\ntransaction:t1\n\n\0").await;
        assert_eq!(h.recorder.frames_for("c2").len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let h = harness();
        h.frame("c1", b"DISCONNECT\nreceipt:bye\n\n\0").await;

        assert_eq!(h.recorder.disconnects.lock().as_slice(), &[ConnectionId::from("c1")]);
        assert_eq!(h.recorder.last_for("c1"), Frame::receipt("bye"));
    }

    #[tokio::test]
    async fn test_server_commands_are_ignored() {
        let h = harness();
        h.frame("c1", b"MESSAGE\nreceipt:x\n\n\0").await;
        h.frame("c1", b"RECEIPT\nreceipt-id:x\n\n\0").await;
        assert!(h.recorder.frames_for("c1").is_empty());
    }

    #[tokio::test]
    async fn test_connection_closed_releases_state() {
        let h = harness();
        h.engine
            .handle_event(ConnectionEvent::NewConnection(ConnectionId::from("c1")))
            .await;
        h.frame("c1", b"SUBSCRIBE\nid:1\ndestination:/queue/a\n\n\0").await;
        h.frame("c1", b"SUBSCRIBE\nid:2\ndestination:/queue/b\n\n\0").await;
        h.frame("c1", b"BEGIN\ntransaction:t1\n\n\0").await;
        h.frame("c2", b"SUBSCRIBE\nid:1\ndestination:/queue/a\n\n\0").await;

        h.engine
            .handle_event(ConnectionEvent::ConnectionClosed(ConnectionId::from("c1")))
            .await;

        assert_eq!(h.subscriptions.len(), 1);
        assert_eq!(h.subscriptions.clients_by_destination("/queue/a")[0].client_id, "c2");

        // The transaction id is free again
        h.frame("c1", b"BEGIN\ntransaction:t1\n\n\0").await;
        assert!(h.recorder.frames_for("c1").is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let h = harness();
        let (tx, rx) = mpsc::channel(8);
        tx.send(ConnectionEvent::Frame {
            id: ConnectionId::from("c1"),
            data: Bytes::from_static(b"SEND\ndestination:/queue/a\n\nx\0"),
        })
        .await
        .unwrap();
        drop(tx);

        h.engine.run(rx).await;
        assert_eq!(h.store.len("/queue/a"), Ok(1));
        assert!(h.recorder.frames_for("c1").is_empty());
    }
}
