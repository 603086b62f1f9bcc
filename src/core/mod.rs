//! Core business logic module
//!
//! This module contains the aggregation and resilience components:
//! - `traits` - Store and queue abstractions shared as `Arc<dyn ...>`
//! - `aggregate_store` - In-memory aggregate store keyed by `(merchant, date)`
//! - `postgres_store` - Postgres aggregate store (feature `postgres`)
//! - `circuit_breaker` - Failure-isolating gate around downstream calls
//! - `processed_transactions` - Windowed deduplication of transaction ids
//! - `processing` - The transaction processing use case
//! - `queries` - Read-side daily balance lookups

pub mod aggregate_store;
pub mod circuit_breaker;
#[cfg(feature = "postgres")]
pub mod postgres_store;
pub mod processed_transactions;
pub mod processing;
pub mod queries;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregate_store::InMemoryAggregateStore;
pub use circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
#[cfg(feature = "postgres")]
pub use postgres_store::PostgresAggregateStore;
pub use processed_transactions::ProcessedTransactions;
pub use processing::{ProcessOutcome, TransactionProcessingUseCase};
pub use queries::{BalanceQueries, DailyBalanceView};
pub use traits::{AggregateStore, MessageQueue};
