//! Service wiring
//!
//! `BalanceService` assembles the running system:
//!
//! ```text
//! BalanceService
//!     ├── InMemoryQueue (seeded from a replay file, or fed by `send`)
//!     ├── EventConsumer
//!     │   ├── CircuitBreaker ("aggregate-store")
//!     │   └── TransactionProcessingUseCase
//!     │       ├── Arc<dyn AggregateStore>
//!     │       └── ProcessedTransactions (dedup window)
//!     └── BalanceQueries
//! ```
//!
//! [`run`] is the binary's entry point: it builds the tokio runtime, optionally
//! seeds the queue from a replay file, consumes until the queue runs idle (replay)
//! or Ctrl-C, and writes the aggregate report as CSV.
//!
//! Aggregates are kept in memory unless the `postgres` feature is enabled and
//! `database_url` is set, in which case they go to a `PostgresAggregateStore`.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::consumer::{BatchReport, ConsumerConfig, EventConsumer, InMemoryQueue, QueueConfig};
use crate::core::{
    AggregateStore, BalanceQueries, BreakerConfig, CircuitBreaker, InMemoryAggregateStore,
    ProcessedTransactions, TransactionProcessingUseCase,
};
#[cfg(feature = "postgres")]
use crate::core::PostgresAggregateStore;
use crate::io::csv_format::write_aggregates_csv;
use crate::io::replay_reader::ReplayReader;
use crate::types::{AggregatorError, EVENT_TYPE_ATTRIBUTE};

/// Name under which the store breaker logs and reports metrics
pub const STORE_BREAKER: &str = "aggregate-store";

/// Everything needed to assemble a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub consumer: ConsumerConfig,
    pub breaker: BreakerConfig,
    pub queue: QueueConfig,
    /// How long applied transaction ids are remembered; zero disables
    pub dedup_window: Duration,
    /// Tokio worker threads
    pub worker_threads: usize,
    /// Postgres connection string; `None` keeps aggregates in memory
    #[cfg(feature = "postgres")]
    pub database_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            consumer: ConsumerConfig::default(),
            breaker: BreakerConfig::default(),
            queue: QueueConfig::default(),
            dedup_window: Duration::from_secs(15 * 60),
            worker_threads: num_cpus::get(),
            #[cfg(feature = "postgres")]
            database_url: None,
        }
    }
}

/// The assembled consumer service
pub struct BalanceService {
    store: Arc<dyn AggregateStore>,
    queue: Arc<InMemoryQueue>,
    consumer: EventConsumer,
}

impl BalanceService {
    /// Assemble a service over an in-memory store
    pub fn new(config: &ServiceConfig) -> Self {
        Self::with_store(Arc::new(InMemoryAggregateStore::new()), config)
    }

    /// Assemble a service over the store `config` selects
    ///
    /// With a database URL, connects to Postgres and creates the table if it
    /// is missing.
    pub async fn from_config(config: &ServiceConfig) -> Result<Self, AggregatorError> {
        #[cfg(feature = "postgres")]
        {
            if let Some(database_url) = &config.database_url {
                let store = PostgresAggregateStore::connect(database_url).await?;
                store.init_schema().await?;
                tracing::info!("aggregates stored in postgres");
                return Ok(Self::with_store(Arc::new(store), config));
            }
        }

        Ok(Self::new(config))
    }

    /// Assemble a service over the given store
    pub fn with_store(store: Arc<dyn AggregateStore>, config: &ServiceConfig) -> Self {
        let queue = Arc::new(InMemoryQueue::new(config.queue.clone()));
        let processed = Arc::new(ProcessedTransactions::new(config.dedup_window));
        let use_case = TransactionProcessingUseCase::new(Arc::clone(&store), processed);
        let breaker = Arc::new(CircuitBreaker::new(STORE_BREAKER, config.breaker.clone()));

        let consumer = EventConsumer::new(
            queue.clone(),
            use_case,
            breaker,
            config.consumer.clone(),
        );

        Self {
            store,
            queue,
            consumer,
        }
    }

    pub fn queue(&self) -> &Arc<InMemoryQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &EventConsumer {
        &self.consumer
    }

    pub fn queries(&self) -> BalanceQueries {
        BalanceQueries::new(Arc::clone(&self.store))
    }

    /// Publish every record of a replay file to the queue
    ///
    /// Lines that are not valid replay records are logged and skipped.
    ///
    /// # Returns
    ///
    /// The number of messages sent.
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize, AggregatorError> {
        let reader = ReplayReader::new(path)?;
        let mut sent = 0;

        for record in reader {
            match record {
                Ok(record) => {
                    let attributes = record
                        .event_type
                        .map(|event_type| {
                            [(EVENT_TYPE_ATTRIBUTE.to_string(), event_type)]
                                .into_iter()
                                .collect()
                        })
                        .unwrap_or_default();
                    self.queue.send(record.body, attributes).await;
                    sent += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping replay line"),
            }
        }

        tracing::info!(messages = sent, path = %path.display(), "queue seeded from replay file");
        Ok(sent)
    }

    /// Consume until `cancel` fires or, with `exit_when_idle`, the queue is idle
    pub async fn run(&self, cancel: CancellationToken) -> Result<BatchReport, AggregatorError> {
        self.consumer.run(cancel).await
    }

    /// Write every aggregate as a CSV report
    pub async fn write_report(&self, output: &mut dyn Write) -> Result<(), AggregatorError> {
        let aggregates = self.store.all().await?;
        write_aggregates_csv(&aggregates, output)
    }
}

/// Run the service to completion and write the report to `output`
///
/// With `input`, the queue is seeded from that replay file first. The consumer
/// stops on Ctrl-C, or when the queue runs idle if the consumer config asks
/// for it.
///
/// # Errors
///
/// Fatal errors only: the runtime could not be built, the store could not be
/// reached, the replay file could not be opened, or the report could not be
/// written. Per-message failures are
/// logged and counted, never returned.
pub fn run(
    input: Option<&Path>,
    config: &ServiceConfig,
    output: &mut dyn Write,
) -> Result<BatchReport, AggregatorError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .enable_all()
        .build()
        .map_err(|e| AggregatorError::config(format!("Failed to create tokio runtime: {}", e)))?;

    runtime.block_on(async {
        let service = BalanceService::from_config(config).await?;

        if let Some(path) = input {
            service.seed_from_file(path).await?;
        }

        let cancel = CancellationToken::new();
        let shutdown = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    cancel.cancel();
                }
            })
        };

        let totals = service.run(cancel).await;
        shutdown.abort();
        let totals = totals?;

        tracing::info!(
            received = totals.received,
            processed = totals.processed,
            duplicates = totals.duplicates,
            unknown_event_types = totals.unknown_event_types,
            decode_failures = totals.decode_failures,
            failures = totals.processing_failures + totals.circuit_open,
            "consumer finished"
        );

        service.write_report(output).await?;
        Ok(totals)
    })
}
