//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `aggregate`: Daily balance aggregate and its natural key
//! - `event`: Inbound transaction events and identifiers
//! - `message`: Raw queue messages and attribute names
//! - `error`: Error types for the balance consumer

pub mod aggregate;
pub mod error;
pub mod event;
pub mod message;

pub use aggregate::{AggregateKey, BalanceAggregate};
pub use error::AggregatorError;
pub use event::{InboundTransactionEvent, MerchantId, TransactionId, TransactionType};
pub use message::{QueueMessage, EVENT_TYPE_ATTRIBUTE, TRANSACTION_CREATED_EVENT};
