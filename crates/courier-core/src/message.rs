//! Conversion of published frames into deliverable messages.

use courier_protocol::{header, Command, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique message ID.
#[must_use]
pub fn generate_message_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg-{timestamp:x}-{counter}")
}

/// Turn a SEND frame into a MESSAGE frame.
///
/// Headers are copied, the command is changed and a fresh `message-id` is
/// assigned. The source frame is left untouched.
#[must_use]
pub fn prepare_message(frame: &Frame) -> Frame {
    let mut message = Frame {
        command: Command::Message,
        headers: frame.headers.clone(),
        body: frame.body.clone(),
    };
    message.headers.set(header::MESSAGE_ID, generate_message_id());
    message
}

/// Copy of `message` addressed to one subscription.
#[must_use]
pub fn for_subscription(message: &Frame, subscription_id: &str) -> Frame {
    let mut copy = message.clone();
    copy.headers.set(header::SUBSCRIPTION, subscription_id);
    copy
}
