//! Broker wiring.
//!
//! Builds the shared state, binds the connection layer and starts the
//! engine and delivery tasks.

use crate::config::Config;
use crate::delivery::DeliveryPool;
use crate::engine::{Engine, EngineConfig};
use crate::metrics::{self, BrokerStats};
use anyhow::{Context, Result};
use courier_core::{MemoryStore, Store, SubscriptionRegistry};
use courier_transport::{ConnectionManager, TcpConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A running broker.
pub struct Broker {
    manager: Arc<ConnectionManager>,
    engine: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

impl Broker {
    /// Bind the listener and start the engine and delivery tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(config: &Config, stats: Arc<BrokerStats>) -> Result<Self> {
        let store: Arc<dyn Store> =
            Arc::new(MemoryStore::with_destinations(config.destinations.iter().cloned()));
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        metrics::set_destinations(store.destinations().len());

        let (events_tx, events_rx) = mpsc::channel(config.connection.event_buffer.max(1));
        let transport = TcpConfig {
            bind_addr: config.bind_addr(),
            read_timeout: config.heartbeat_interval(),
            shutdown_delay: config.shutdown_delay(),
            write_timeout: config.write_timeout(),
            max_frame_size: config.connection.max_frame_size,
        };
        let manager = ConnectionManager::bind(transport, events_tx)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

        let engine = Engine::new(
            manager.clone(),
            Arc::clone(&store),
            Arc::clone(&subscriptions),
            Arc::clone(&stats),
            EngineConfig {
                host: config.host.clone(),
                heartbeat_ms: config.heartbeat.interval_ms,
                collapse_commits: config.transactions.collapse_per_destination,
            },
        );
        let engine = tokio::spawn(async move { engine.run(events_rx).await });

        let delivery = DeliveryPool::new(
            store,
            subscriptions,
            manager.clone(),
            stats,
            config.delivery.workers,
        )
        .spawn();

        Ok(Self {
            manager,
            engine,
            delivery,
        })
    }

    /// Address the broker accepts clients on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.manager.local_addr()
    }

    /// Stop accepting clients and stop the engine and delivery tasks.
    pub fn shutdown(self) {
        self.manager.stop();
        self.engine.abort();
        self.delivery.abort();
    }
}

/// Run the broker until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the broker fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let stats = Arc::new(BrokerStats::new());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&config.metrics_addr(), Arc::clone(&stats)).await
        {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let broker = Broker::start(&config, stats).await?;
    info!(
        destinations = config.destinations.len(),
        workers = config.delivery.workers,
        "Courier listening on {}",
        broker.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    broker.shutdown();
    Ok(())
}
