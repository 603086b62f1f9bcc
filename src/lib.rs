//! Merchant Balance Consumer Library
//! # Overview
//!
//! This library consumes transaction events from a queue and folds them into
//! per-merchant, per-day balance aggregates, tolerating downstream failures
//! through a circuit breaker.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (BalanceAggregate, InboundTransactionEvent, errors)
//! - [`cli`] - CLI arguments parsing
//! - [`core`] - Business logic components:
//!   - [`core::processing`] - Locate-or-create, apply, persist
//!   - [`core::circuit_breaker`] - Load shedding for a failing dependency
//!   - [`core::aggregate_store`] - Aggregate persistence keyed by `(merchant, date)`
//!   - [`core::queries`] - Daily balance lookups
//! - [`consumer`] - The queue and the polling loop
//! - [`io`] - Message body format, replay files and the CSV report
//! - [`service`] - Wiring, runtime and shutdown
//! - [`telemetry`] - In-process totals of the emitted `metrics` counters
//!
//! # Delivery Semantics
//!
//! Delivery is at-least-once. A message is deleted only after its effect was
//! persisted; anything else leaves it in the queue for redelivery:
//!
//! - **Unknown event type**: retained (or dead-lettered), never decoded
//! - **Undecodable body**: retained
//! - **Breaker open**: retained, the store is not called
//! - **Processing failure**: retained, counted by the breaker
//!
//! A redelivered transaction inside the deduplication window is acknowledged
//! without being applied again.
//!
//! # Aggregate State
//!
//! Each aggregate maintains:
//! - `total_credits`: Sum of credit amounts for the day
//! - `total_debits`: Sum of debit amounts for the day
//! - `net_balance`: `total_credits - total_debits`, recomputed on every change

// Module declarations
pub mod cli;
pub mod consumer;
pub mod core;
pub mod io;
pub mod service;
pub mod telemetry;
pub mod types;

pub use consumer::{BatchReport, ConsumerConfig, EventConsumer, InMemoryQueue, QueueConfig};
pub use core::{
    AggregateStore, BalanceQueries, BreakerConfig, CircuitBreaker, InMemoryAggregateStore,
    MessageQueue, TransactionProcessingUseCase,
};
pub use io::write_aggregates_csv;
pub use service::{BalanceService, ServiceConfig};
pub use telemetry::CounterRecorder;
pub use types::{
    AggregatorError, BalanceAggregate, InboundTransactionEvent, MerchantId, TransactionId,
    TransactionType,
};
