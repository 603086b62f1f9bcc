//! Queue consumption
//!
//! - `queue` - In-memory queue with visibility timeouts and redrive
//! - `event_consumer` - The polling loop routing messages into the use case

pub mod event_consumer;
pub mod queue;

pub use event_consumer::{
    BatchReport, ConsumerConfig, ConsumerState, EventConsumer, MessageOutcome, UnknownEventPolicy,
};
pub use queue::{DeadLetter, DeadLetterReason, InMemoryQueue, QueueConfig};
