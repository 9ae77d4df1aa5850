//! Subscription registry.
//!
//! A subscription is a client's interest in one destination, named by an id
//! the client picks. The pair (client id, subscription id) is unique.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Subscription registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The client already holds a subscription with this id.
    #[error("subscription {subscription} from client {client} already exists")]
    AlreadyExists {
        /// Owning client.
        client: String,
        /// Client-scoped subscription id.
        subscription: String,
    },

    /// No subscription with this id for this client.
    #[error("no such subscription {subscription} for client {client}")]
    NotFound {
        /// Owning client.
        client: String,
        /// Client-scoped subscription id.
        subscription: String,
    },
}

/// A registered subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Client-scoped subscription id.
    pub id: String,
    /// Destination the subscription listens on.
    pub destination: String,
    /// Owning connection.
    pub client_id: String,
}

type SubscriptionKey = (String, String);

#[derive(Debug, Default)]
struct Inner {
    by_key: HashMap<SubscriptionKey, Subscription>,
    by_destination: HashMap<String, HashSet<SubscriptionKey>>,
}

impl Inner {
    fn remove(&mut self, key: &SubscriptionKey) -> Option<Subscription> {
        let sub = self.by_key.remove(key)?;
        if let Some(keys) = self.by_destination.get_mut(&sub.destination) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_destination.remove(&sub.destination);
            }
        }
        Some(sub)
    }
}

/// All live subscriptions, indexed by owner and by destination.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    ///
    /// # Errors
    ///
    /// Fails if the client already has a subscription with this id.
    pub fn subscribe(
        &self,
        client_id: &str,
        sub_id: &str,
        destination: &str,
    ) -> Result<(), SubscriptionError> {
        let key = (client_id.to_string(), sub_id.to_string());
        let mut inner = self.inner.lock();
        if inner.by_key.contains_key(&key) {
            return Err(SubscriptionError::AlreadyExists {
                client: client_id.to_string(),
                subscription: sub_id.to_string(),
            });
        }

        inner
            .by_destination
            .entry(destination.to_string())
            .or_default()
            .insert(key.clone());
        inner.by_key.insert(
            key,
            Subscription {
                id: sub_id.to_string(),
                destination: destination.to_string(),
                client_id: client_id.to_string(),
            },
        );

        debug!(client = %client_id, subscription = %sub_id, destination = %destination, "Subscribed");
        Ok(())
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// Fails if the subscription does not exist.
    pub fn unsubscribe(&self, client_id: &str, sub_id: &str) -> Result<Subscription, SubscriptionError> {
        let key = (client_id.to_string(), sub_id.to_string());
        let removed = self.inner.lock().remove(&key);
        match removed {
            Some(sub) => {
                debug!(client = %client_id, subscription = %sub_id, destination = %sub.destination, "Unsubscribed");
                Ok(sub)
            }
            None => Err(SubscriptionError::NotFound {
                client: client_id.to_string(),
                subscription: sub_id.to_string(),
            }),
        }
    }

    /// Look up a subscription.
    ///
    /// # Errors
    ///
    /// Fails if the subscription does not exist.
    pub fn get(&self, client_id: &str, sub_id: &str) -> Result<Subscription, SubscriptionError> {
        let key = (client_id.to_string(), sub_id.to_string());
        self.inner
            .lock()
            .by_key
            .get(&key)
            .cloned()
            .ok_or_else(|| SubscriptionError::NotFound {
                client: client_id.to_string(),
                subscription: sub_id.to_string(),
            })
    }

    /// Every subscription currently listening on `destination`, in no
    /// particular order.
    #[must_use]
    pub fn clients_by_destination(&self, destination: &str) -> Vec<Subscription> {
        let inner = self.inner.lock();
        inner
            .by_destination
            .get(destination)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| inner.by_key.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove every subscription owned by a client.
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&self, client_id: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<SubscriptionKey> = inner
            .by_key
            .keys()
            .filter(|(client, _)| client == client_id)
            .cloned()
            .collect();

        for key in &keys {
            inner.remove(key);
        }

        debug!(client = %client_id, removed = keys.len(), "Unsubscribed from all destinations");
        keys.len()
    }

    /// Total number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().by_key.len()
    }

    /// Check if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
