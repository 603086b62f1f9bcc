//! Wire format of transaction events
//!
//! This module centralizes the message body contract:
//! - `decode_event` parses a body into an `InboundTransactionEvent`
//! - `encode_event` produces the body a publisher sends
//!
//! Field names are matched case-insensitively (`transactionId`,
//! `TransactionId` and `transactionid` are the same field). `type` is an integer:
//! `0` for credit, `1` for debit. Timestamps are ISO-8601; a timestamp without
//! an offset is taken as UTC.
//!
//! All functions are pure (no I/O) for easy testing.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{AggregatorError, InboundTransactionEvent, TransactionType};

/// Body structure after field names were lowercased
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "transactionid")]
    transaction_id: Uuid,
    #[serde(rename = "merchantid")]
    merchant_id: Uuid,
    #[serde(rename = "type")]
    kind: i64,
    amount: Decimal,
    #[serde(rename = "transactiondate")]
    transaction_date: String,
    #[serde(rename = "occurredat")]
    occurred_at: Option<String>,
}

/// Parse an ISO-8601 timestamp into UTC
///
/// Accepts RFC 3339 with an offset (normalized to UTC) and naive timestamps
/// (taken as UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Ok(with_offset.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("invalid timestamp '{}'", value))
}

/// Decode a message body into a transaction event
///
/// # Arguments
///
/// * `message_id` - Queue message id, carried into decode errors for logging
/// * `body` - Raw message body
///
/// # Returns
///
/// * `Ok(InboundTransactionEvent)` - Successfully decoded event
/// * `Err(AggregatorError::Decode)` - Malformed JSON, a `null` body, a missing
///   or mistyped field, an unknown type code, or an unparseable timestamp
pub fn decode_event(
    message_id: Option<&str>,
    body: &str,
) -> Result<InboundTransactionEvent, AggregatorError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| AggregatorError::decode(message_id, e.to_string()))?;

    let fields = match value {
        Value::Object(fields) => fields,
        Value::Null => return Err(AggregatorError::decode(message_id, "body is null")),
        _ => {
            return Err(AggregatorError::decode(
                message_id,
                "body is not a JSON object",
            ))
        }
    };

    let lowercased: Map<String, Value> = fields
        .into_iter()
        .map(|(name, field)| (name.to_lowercase(), field))
        .collect();

    let wire: WireEvent = serde_json::from_value(Value::Object(lowercased))
        .map_err(|e| AggregatorError::decode(message_id, e.to_string()))?;

    let kind = TransactionType::try_from(wire.kind)
        .map_err(|e| AggregatorError::decode(message_id, e))?;

    let transaction_date = parse_timestamp(&wire.transaction_date)
        .map_err(|e| AggregatorError::decode(message_id, format!("transactionDate: {}", e)))?;

    let occurred_at = match wire.occurred_at {
        Some(raw) => parse_timestamp(&raw)
            .map_err(|e| AggregatorError::decode(message_id, format!("occurredAt: {}", e)))?,
        None => transaction_date,
    };

    Ok(InboundTransactionEvent {
        transaction_id: wire.transaction_id,
        merchant_id: wire.merchant_id,
        kind,
        amount: wire.amount,
        transaction_date,
        occurred_at,
    })
}

/// Encode an event the way the publisher does: camelCase JSON, integer type
pub fn encode_event(event: &InboundTransactionEvent) -> Result<String, AggregatorError> {
    let amount: serde_json::Number = event.amount.to_string().parse()?;

    let body = serde_json::json!({
        "transactionId": event.transaction_id,
        "merchantId": event.merchant_id,
        "type": event.kind.code(),
        "amount": amount,
        "transactionDate": event.transaction_date.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        "occurredAt": event.occurred_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    });

    Ok(body.to_string())
}
