//! Error types for the merchant balance consumer
//!
//! This module defines every error that can surface while consuming transaction
//! events and folding them into daily balance aggregates.
//!
//! # Error Categories
//!
//! - **Message Errors**: Undecodable bodies, unknown event types (skip, retain message)
//! - **Downstream Errors**: Store or dependency failures (counted by the circuit breaker)
//! - **Store Errors**: Unique-key violations and missing rows
//! - **Resilience Errors**: Circuit breaker rejections
//! - **Transport Errors**: Queue poll and acknowledgement failures
//! - **Arithmetic Errors**: Overflow while accumulating totals

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the balance consumer
///
/// Each variant carries enough context to be logged on its own. The consumer
/// loop never lets a per-message error escape the batch; only poll failures
/// change the loop's control flow (back-off and retry).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregatorError {
    /// The message body could not be decoded into a transaction event
    ///
    /// Recoverable - the message is skipped and left in the queue.
    #[error("Failed to decode message{}: {message}", message_id.as_ref().map(|id| format!(" {}", id)).unwrap_or_default())]
    Decode {
        /// Queue message id (if known at the point of failure)
        message_id: Option<String>,
        /// Description of the decoding failure
        message: String,
    },

    /// The `EventType` attribute is missing or not handled by this consumer
    ///
    /// Recoverable - no decode is attempted and the message is not deleted.
    #[error("Unknown event type '{}'", event_type.as_deref().unwrap_or("<missing>"))]
    UnknownEventType {
        /// The attribute value, if one was present
        event_type: Option<String>,
    },

    /// A downstream dependency (database, queue) failed
    ///
    /// These failures are what the circuit breaker counts.
    #[error("Downstream failure during {operation}: {message}")]
    Downstream {
        /// The operation that failed
        operation: String,
        /// Description of the failure
        message: String,
    },

    /// An aggregate for the natural key already exists
    ///
    /// Raised by stores when a concurrent first event won the creation race.
    #[error("Aggregate for merchant {merchant_id} on {date} already exists")]
    DuplicateAggregate {
        /// Merchant identifier
        merchant_id: Uuid,
        /// Balance date
        date: NaiveDate,
    },

    /// An aggregate expected to exist was not found
    #[error("Aggregate for merchant {merchant_id} on {date} not found")]
    AggregateNotFound {
        /// Merchant identifier
        merchant_id: Uuid,
        /// Balance date
        date: NaiveDate,
    },

    /// Accumulating an amount would overflow the decimal range
    #[error("Arithmetic overflow adding {operation} for merchant {merchant_id} on {date}")]
    ArithmeticOverflow {
        /// "credit" or "debit"
        operation: String,
        /// Merchant identifier
        merchant_id: Uuid,
        /// Balance date
        date: NaiveDate,
    },

    /// The circuit breaker rejected the call without invoking it
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Receiving from the queue failed
    ///
    /// Triggers the poll back-off in the consumer loop.
    #[error("Queue poll failed: {message}")]
    PollFailure {
        /// Description of the transport failure
        message: String,
    },

    /// Deleting or dead-lettering a message failed
    #[error("Failed to acknowledge message with receipt '{receipt_handle}': {message}")]
    Acknowledge {
        /// Receipt handle that was used
        receipt_handle: String,
        /// Description of the failure
        message: String,
    },

    /// A range query was issued with start after end
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        /// Requested start date
        start: NaiveDate,
        /// Requested end date
        end: NaiveDate,
    },

    /// Invalid configuration or runtime setup
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// I/O error while reading replay input or writing the report
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the I/O error
        message: String,
    },
}

impl From<std::io::Error> for AggregatorError {
    fn from(error: std::io::Error) -> Self {
        AggregatorError::IoError {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for AggregatorError {
    fn from(error: csv::Error) -> Self {
        AggregatorError::IoError {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for AggregatorError {
    fn from(error: serde_json::Error) -> Self {
        AggregatorError::Decode {
            message_id: None,
            message: error.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AggregatorError {
    fn from(error: sqlx::Error) -> Self {
        AggregatorError::downstream("database", error.to_string())
    }
}

// Helper functions for creating common errors

impl AggregatorError {
    /// Create a Decode error
    pub fn decode(message_id: Option<&str>, message: impl Into<String>) -> Self {
        AggregatorError::Decode {
            message_id: message_id.map(str::to_string),
            message: message.into(),
        }
    }

    /// Create an UnknownEventType error
    pub fn unknown_event_type(event_type: Option<&str>) -> Self {
        AggregatorError::UnknownEventType {
            event_type: event_type.map(str::to_string),
        }
    }

    /// Create a Downstream error
    pub fn downstream(operation: &str, message: impl Into<String>) -> Self {
        AggregatorError::Downstream {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a DuplicateAggregate error
    pub fn duplicate_aggregate(merchant_id: Uuid, date: NaiveDate) -> Self {
        AggregatorError::DuplicateAggregate { merchant_id, date }
    }

    /// Create an AggregateNotFound error
    pub fn aggregate_not_found(merchant_id: Uuid, date: NaiveDate) -> Self {
        AggregatorError::AggregateNotFound { merchant_id, date }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str, merchant_id: Uuid, date: NaiveDate) -> Self {
        AggregatorError::ArithmeticOverflow {
            operation: operation.to_string(),
            merchant_id,
            date,
        }
    }

    /// Create a PollFailure error
    pub fn poll_failure(message: impl Into<String>) -> Self {
        AggregatorError::PollFailure {
            message: message.into(),
        }
    }

    /// Create an Acknowledge error
    pub fn acknowledge(receipt_handle: &str, message: impl Into<String>) -> Self {
        AggregatorError::Acknowledge {
            receipt_handle: receipt_handle.to_string(),
            message: message.into(),
        }
    }

    /// Create an InvalidDateRange error
    pub fn invalid_date_range(start: NaiveDate, end: NaiveDate) -> Self {
        AggregatorError::InvalidDateRange { start, end }
    }

    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        AggregatorError::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn merchant() -> Uuid {
        Uuid::parse_str("6f2c1a9e-0000-4000-8000-000000000001").unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 17).unwrap()
    }

    #[rstest]
    #[case::decode_with_id(
        AggregatorError::decode(Some("m-1"), "expected value"),
        "Failed to decode message m-1: expected value"
    )]
    #[case::decode_without_id(
        AggregatorError::decode(None, "expected value"),
        "Failed to decode message: expected value"
    )]
    #[case::unknown_event_type(
        AggregatorError::unknown_event_type(Some("TransactionDeletedEvent")),
        "Unknown event type 'TransactionDeletedEvent'"
    )]
    #[case::missing_event_type(
        AggregatorError::unknown_event_type(None),
        "Unknown event type '<missing>'"
    )]
    #[case::downstream(
        AggregatorError::downstream("persist", "connection refused"),
        "Downstream failure during persist: connection refused"
    )]
    #[case::duplicate_aggregate(
        AggregatorError::duplicate_aggregate(merchant(), date()),
        "Aggregate for merchant 6f2c1a9e-0000-4000-8000-000000000001 on 2026-01-17 already exists"
    )]
    #[case::circuit_open(AggregatorError::CircuitOpen, "Circuit breaker is open")]
    #[case::poll_failure(
        AggregatorError::poll_failure("endpoint unreachable"),
        "Queue poll failed: endpoint unreachable"
    )]
    #[case::invalid_range(
        AggregatorError::invalid_date_range(
            NaiveDate::from_ymd_opt(2026, 1, 18).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 17).unwrap()
        ),
        "Invalid date range: start 2026-01-18 is after end 2026-01-17"
    )]
    fn test_error_display(#[case] error: AggregatorError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn test_json_error_conversion_is_decode() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: AggregatorError = json_error.into();
        assert!(matches!(error, AggregatorError::Decode { message_id: None, .. }));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied");
        let error: AggregatorError = io_error.into();
        assert_eq!(error.to_string(), "I/O error: Permission denied");
    }
}
