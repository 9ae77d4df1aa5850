//! Client transactions.
//!
//! A transaction buffers SEND frames between BEGIN and COMMIT. The registry
//! only stores frames; turning them into messages and enqueuing them is up
//! to whoever commits.

use courier_protocol::Frame;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Transaction registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// BEGIN for a transaction that is already open.
    #[error("transaction {transaction} already exists for client {client}")]
    AlreadyExists {
        /// Client-scoped transaction id.
        transaction: String,
        /// Owning client.
        client: String,
    },

    /// No open transaction with this id for this client.
    #[error("no such transaction {transaction} for client {client}")]
    NotFound {
        /// Client-scoped transaction id.
        transaction: String,
        /// Owning client.
        client: String,
    },
}

/// The frames buffered by one transaction, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Buffered frames.
    pub frames: Vec<Frame>,
}

type TransactionKey = (String, String);

/// Open transactions keyed by (transaction id, client id).
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    transactions: Mutex<HashMap<TransactionKey, Transaction>>,
}

fn key(tx_id: &str, client_id: &str) -> TransactionKey {
    (tx_id.to_string(), client_id.to_string())
}

impl TransactionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Fails if the client already has an open transaction with this id.
    pub fn start(&self, tx_id: &str, client_id: &str) -> Result<(), TransactionError> {
        let mut transactions = self.transactions.lock();
        let key = key(tx_id, client_id);
        if transactions.contains_key(&key) {
            return Err(TransactionError::AlreadyExists {
                transaction: tx_id.to_string(),
                client: client_id.to_string(),
            });
        }
        transactions.insert(key, Transaction::default());
        debug!(client = %client_id, transaction = %tx_id, "Transaction started");
        Ok(())
    }

    /// Append a frame to an open transaction.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not open.
    pub fn add_frame(&self, tx_id: &str, client_id: &str, frame: Frame) -> Result<(), TransactionError> {
        let mut transactions = self.transactions.lock();
        let tx = transactions
            .get_mut(&key(tx_id, client_id))
            .ok_or_else(|| not_found(tx_id, client_id))?;
        tx.frames.push(frame);
        debug!(client = %client_id, transaction = %tx_id, buffered = tx.frames.len(), "Frame added to transaction");
        Ok(())
    }

    /// Discard an open transaction and everything it buffered.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not open.
    pub fn abort(&self, tx_id: &str, client_id: &str) -> Result<(), TransactionError> {
        self.transactions
            .lock()
            .remove(&key(tx_id, client_id))
            .ok_or_else(|| not_found(tx_id, client_id))?;
        debug!(client = %client_id, transaction = %tx_id, "Transaction aborted");
        Ok(())
    }

    /// Close an open transaction and hand back its frames.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not open.
    pub fn commit(&self, tx_id: &str, client_id: &str) -> Result<Transaction, TransactionError> {
        let tx = self
            .transactions
            .lock()
            .remove(&key(tx_id, client_id))
            .ok_or_else(|| not_found(tx_id, client_id))?;
        debug!(client = %client_id, transaction = %tx_id, frames = tx.frames.len(), "Transaction committed");
        Ok(tx)
    }

    /// Discard every open transaction of a client.
    ///
    /// Returns the number of transactions aborted.
    pub fn abort_all(&self, client_id: &str) -> usize {
        let mut transactions = self.transactions.lock();
        let before = transactions.len();
        transactions.retain(|(_, client), _| client != client_id);
        let aborted = before - transactions.len();
        if aborted > 0 {
            debug!(client = %client_id, aborted, "Aborted orphaned transactions");
        }
        aborted
    }

    /// Number of open transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Check if no transaction is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_found(tx_id: &str, client_id: &str) -> TransactionError {
    TransactionError::NotFound {
        transaction: tx_id.to_string(),
        client: client_id.to_string(),
    }
}
