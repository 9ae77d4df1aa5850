//! Message fan-out.
//!
//! A dispatch loop pops one message per destination per pass and hands it,
//! together with the destination's current subscribers, to a pool of
//! workers. Each worker owns a bounded job queue and a destination always
//! maps to the same worker, so subscribers see a destination's messages in
//! pop order. Workers write a copy of the message to every subscriber.
//! When every queue is empty the loop sleeps until the store reports an
//! enqueue.

use crate::metrics::{error_kind, BrokerStats};
use courier_core::{for_subscription, Store, StoreError, Subscription, SubscriptionRegistry};
use courier_protocol::{codec, Frame};
use courier_transport::{ConnectionId, Outbound};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Jobs a worker may have queued before the dispatch loop waits on it.
const WORKER_QUEUE: usize = 64;

/// One popped message and the subscribers it goes to.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// MESSAGE frame as stored.
    pub message: Frame,
    /// Subscribers of the destination at pop time.
    pub subscribers: Vec<Subscription>,
}

/// Dispatch loop plus fan-out workers.
pub struct DeliveryPool {
    store: Arc<dyn Store>,
    subscriptions: Arc<SubscriptionRegistry>,
    outbound: Arc<dyn Outbound>,
    stats: Arc<BrokerStats>,
    workers: usize,
}

impl DeliveryPool {
    /// Create a pool with `workers` fan-out tasks (at least one).
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        subscriptions: Arc<SubscriptionRegistry>,
        outbound: Arc<dyn Outbound>,
        stats: Arc<BrokerStats>,
        workers: usize,
    ) -> Self {
        Self {
            store,
            subscriptions,
            outbound,
            stats,
            workers: workers.max(1),
        }
    }

    /// Start the workers and the dispatch loop.
    ///
    /// The returned handle belongs to the dispatch loop; aborting it closes
    /// the job queues and the workers exit.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(workers = self.workers, "Starting delivery workers");

        let mut queues = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let (jobs_tx, jobs) = flume::bounded::<DeliveryJob>(WORKER_QUEUE);
            queues.push(jobs_tx);
            let outbound = Arc::clone(&self.outbound);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                while let Ok(job) = jobs.recv_async().await {
                    deliver(worker, &job, outbound.as_ref(), &stats).await;
                }
                debug!(worker, "Delivery worker stopped");
            });
        }

        tokio::spawn(async move { self.dispatch_loop(queues).await })
    }

    async fn dispatch_loop(self, queues: Vec<flume::Sender<DeliveryJob>>) {
        loop {
            let mut popped = false;

            for destination in self.store.destinations() {
                let message = match self.store.pop(&destination) {
                    Ok(message) => message,
                    Err(StoreError::Empty(_)) => continue,
                    Err(e) => {
                        warn!(destination = %destination, error = %e, "Pop failed");
                        continue;
                    }
                };
                popped = true;

                let subscribers = self.subscriptions.clients_by_destination(&destination);
                if subscribers.is_empty() {
                    debug!(destination = %destination, "No subscribers, message dropped");
                }
                trace!(
                    destination = %destination,
                    subscribers = subscribers.len(),
                    "Dispatching message"
                );

                let job = DeliveryJob {
                    message,
                    subscribers,
                };
                let queue = &queues[worker_for(&destination, queues.len())];
                if queue.send_async(job).await.is_err() {
                    warn!("Delivery workers gone, stopping dispatch");
                    return;
                }
            }

            if !popped {
                self.store.wait_for_messages().await;
            }
        }
    }
}

/// Worker that owns `destination`.
fn worker_for(destination: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    destination.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

/// Write one job's message to each of its subscribers.
///
/// A failed write is counted and skipped; the remaining subscribers still
/// get their copy.
pub async fn deliver(worker: usize, job: &DeliveryJob, outbound: &dyn Outbound, stats: &BrokerStats) {
    for subscriber in &job.subscribers {
        let frame = for_subscription(&job.message, &subscriber.id);
        let client = ConnectionId::from(subscriber.client_id.as_str());

        match outbound.write(&client, codec::serialize(&frame)).await {
            Ok(()) => stats.inc_sent(),
            Err(e) => {
                warn!(
                    worker,
                    connection = %client,
                    subscription = %subscriber.id,
                    error = %e,
                    "Delivery failed"
                );
                stats.inc_error(error_kind::DELIVERY);
            }
        }
    }
}
