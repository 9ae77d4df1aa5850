//! # courier-core
//!
//! Broker state for the Courier message broker.
//!
//! This crate provides the bookkeeping the protocol engine mutates:
//!
//! - **SubscriptionRegistry** - Which client listens on which destination
//! - **TransactionRegistry** - SEND frames buffered between BEGIN and COMMIT
//! - **Store** - Per-destination FIFO queues
//! - **message** - Turning SEND frames into MESSAGE frames
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  SEND   ┌─────────────┐  pop   ┌──────────────┐
//! │   Engine    │────────▶│    Store    │───────▶│   Delivery   │
//! └─────────────┘         └─────────────┘        └──────────────┘
//!        │                                               │
//!        ▼                                               ▼
//! ┌──────────────┐                              ┌──────────────┐
//! │ Transactions │                              │Subscriptions │
//! └──────────────┘                              └──────────────┘
//! ```

pub mod message;
pub mod store;
pub mod subscription;
pub mod transaction;

pub use message::{for_subscription, generate_message_id, prepare_message};
pub use store::{MemoryStore, Store, StoreError};
pub use subscription::{Subscription, SubscriptionError, SubscriptionRegistry};
pub use transaction::{Transaction, TransactionError, TransactionRegistry};
