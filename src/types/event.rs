//! Transaction event types consumed from the queue
//!
//! This module defines the decoded payload of a transaction event and the
//! identifiers used to key balance aggregates.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Merchant identifier
pub type MerchantId = Uuid;

/// Transaction identifier (traceability and deduplication)
pub type TransactionId = Uuid;

/// Direction of a transaction
///
/// On the wire the type is an integer: `0` for credit, `1` for debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Money coming in; added to `total_credits`
    Credit,

    /// Money going out; added to `total_debits`
    Debit,
}

impl TransactionType {
    /// Integer code used in the message body
    pub fn code(self) -> u8 {
        match self {
            TransactionType::Credit => 0,
            TransactionType::Debit => 1,
        }
    }

    /// Lowercase label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl TryFrom<i64> for TransactionType {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TransactionType::Credit),
            1 => Ok(TransactionType::Debit),
            other => Err(format!("unknown transaction type code {}", other)),
        }
    }
}

/// A decoded transaction event
///
/// Ephemeral: it is never persisted as an entity. Many events fold into one
/// [`BalanceAggregate`](crate::types::BalanceAggregate) through
/// `(merchant_id, balance_date())`.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundTransactionEvent {
    /// Originating transaction; used for log correlation and deduplication
    pub transaction_id: TransactionId,

    /// Merchant the transaction belongs to
    pub merchant_id: MerchantId,

    /// Credit or debit
    pub kind: TransactionType,

    /// Monetary amount; the upstream validates it is positive
    pub amount: Decimal,

    /// When the transaction happened; its date part is the aggregation key
    pub transaction_date: DateTime<Utc>,

    /// When the event was emitted (informational)
    pub occurred_at: DateTime<Utc>,
}

impl InboundTransactionEvent {
    /// The calendar date this event aggregates into
    ///
    /// Derived from the event's own timestamp, never from the wall clock.
    pub fn balance_date(&self) -> NaiveDate {
        self.transaction_date.date_naive()
    }
}
