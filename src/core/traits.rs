//! Core traits for aggregate persistence and queue transport
//!
//! This module defines the trait abstractions that let the consumer and the
//! processing use case run against interchangeable backends: the in-memory
//! implementations used for replay and tests, and real infrastructure.
//!
//! Both traits are object-safe and meant to be shared as `Arc<dyn ...>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{AggregatorError, BalanceAggregate, MerchantId, QueueMessage};

/// Persistence for daily balance aggregates
///
/// The store, not the application, owns the uniqueness of the natural key
/// `(merchant_id, balance_date)`. It is the backstop against duplicate rows
/// when two first events for the same key race.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Point lookup by natural key
    async fn find_by_key(
        &self,
        merchant_id: MerchantId,
        date: NaiveDate,
    ) -> Result<Option<BalanceAggregate>, AggregatorError>;

    /// Range lookup for one merchant
    ///
    /// Returns aggregates ascending by date. Both bounds are inclusive.
    async fn find_by_range(
        &self,
        merchant_id: MerchantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BalanceAggregate>, AggregatorError>;

    /// Insert a newly created aggregate
    ///
    /// Fails with `DuplicateAggregate` if a row with the same key exists.
    async fn insert(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError>;

    /// Persist pending changes of an existing aggregate
    ///
    /// Last write wins on the mutable totals. Fails with `AggregateNotFound`
    /// if the row does not exist.
    async fn persist(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError>;

    /// Every aggregate in the store, in unspecified order
    async fn all(&self) -> Result<Vec<BalanceAggregate>, AggregatorError>;
}

/// A durable queue with visibility-timeout semantics
///
/// Received messages stay in the queue, hidden, until they are deleted by
/// receipt handle. Undeleted messages become visible again and are redelivered.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Long-poll for up to `max_messages`, waiting at most `wait`
    ///
    /// An empty result is a normal outcome.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, AggregatorError>;

    /// Acknowledge a delivery, removing the message permanently
    async fn delete(&self, receipt_handle: &str) -> Result<(), AggregatorError>;

    /// Move a delivered message to the dead-letter queue
    async fn dead_letter(&self, receipt_handle: &str) -> Result<(), AggregatorError>;
}
