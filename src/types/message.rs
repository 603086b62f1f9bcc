//! Queue message types
//!
//! A `QueueMessage` is what the transport hands to the consumer: an opaque body
//! plus string attributes, and a receipt handle that identifies this particular
//! delivery for acknowledgement.

use std::collections::HashMap;

/// Name of the attribute carrying the event kind
pub const EVENT_TYPE_ATTRIBUTE: &str = "EventType";

/// The only event kind this consumer folds into balances
pub const TRANSACTION_CREATED_EVENT: &str = "TransactionCreatedEvent";

/// A message received from the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Stable identifier of the message across deliveries
    pub message_id: String,

    /// Identifier of this delivery; required to delete the message
    ///
    /// A new handle is issued on every receive, so a handle from an expired
    /// delivery can no longer acknowledge the message.
    pub receipt_handle: String,

    /// Raw body (JSON for transaction events)
    pub body: String,

    /// String message attributes
    pub attributes: HashMap<String, String>,

    /// How many times this message has been received, including this delivery
    pub receive_count: u32,
}

impl QueueMessage {
    /// The `EventType` attribute, if present
    pub fn event_type(&self) -> Option<&str> {
        self.attributes
            .get(EVENT_TYPE_ATTRIBUTE)
            .map(String::as_str)
    }
}
