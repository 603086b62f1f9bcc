//! Transaction processing use case
//!
//! This module provides the `TransactionProcessingUseCase`, which folds one
//! transaction into its daily balance aggregate:
//!
//! 1. Derive the aggregation date from the transaction's own timestamp
//! 2. Look up the aggregate for `(merchant, date)`, creating it when absent
//! 3. Add the amount to credits or debits
//! 4. Persist: insert when newly created, persist pending changes otherwise
//!
//! The use case knows nothing about queues; the consumer calls it once per
//! decoded event, through the circuit breaker.
//!
//! # Duplicates
//!
//! `process` on its own is not idempotent: running it twice for the same event
//! counts the amount twice. `process_event` consults a
//! [`ProcessedTransactions`] window first and turns a replay of an already
//! applied transaction id into [`ProcessOutcome::Duplicate`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;

use crate::core::processed_transactions::ProcessedTransactions;
use crate::core::traits::AggregateStore;
use crate::types::{
    AggregatorError, BalanceAggregate, InboundTransactionEvent, MerchantId, TransactionType,
};

/// Result of processing one event
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The amount was folded in; carries the aggregate as persisted
    Applied(BalanceAggregate),
    /// The transaction id was already applied within the dedup window
    Duplicate,
}

/// Folds transaction events into daily balance aggregates
#[derive(Clone)]
pub struct TransactionProcessingUseCase {
    store: Arc<dyn AggregateStore>,
    processed: Arc<ProcessedTransactions>,
}

impl TransactionProcessingUseCase {
    /// Create a use case over `store` with the given dedup window
    pub fn new(store: Arc<dyn AggregateStore>, processed: Arc<ProcessedTransactions>) -> Self {
        Self { store, processed }
    }

    /// Create a use case that never skips replays
    pub fn without_deduplication(store: Arc<dyn AggregateStore>) -> Self {
        Self::new(store, Arc::new(ProcessedTransactions::disabled()))
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    /// Forget transaction ids that fell out of the dedup window
    pub fn prune_processed(&self) -> usize {
        self.processed.prune()
    }

    /// Apply one credit or debit to the aggregate for its day
    ///
    /// # Returns
    ///
    /// The aggregate as persisted.
    ///
    /// # Errors
    ///
    /// Store failures are propagated unchanged. A lost creation race
    /// (`DuplicateAggregate` on insert) is not an error: the winner's row is
    /// re-read and updated instead.
    pub async fn process(
        &self,
        merchant_id: MerchantId,
        kind: TransactionType,
        amount: Decimal,
        transaction_date: DateTime<Utc>,
    ) -> Result<BalanceAggregate, AggregatorError> {
        let balance_date = transaction_date.date_naive();

        if let Some(mut aggregate) = self.store.find_by_key(merchant_id, balance_date).await? {
            aggregate.apply(kind, amount)?;
            self.store.persist(&aggregate).await?;
            return Ok(aggregate);
        }

        let mut created = BalanceAggregate::new(merchant_id, balance_date);
        created.apply(kind, amount)?;

        match self.store.insert(&created).await {
            Ok(()) => {
                tracing::debug!(
                    merchant_id = %merchant_id,
                    balance_date = %balance_date,
                    "created daily balance aggregate"
                );
                Ok(created)
            }
            Err(AggregatorError::DuplicateAggregate { .. }) => {
                tracing::debug!(
                    merchant_id = %merchant_id,
                    balance_date = %balance_date,
                    "lost aggregate creation race, updating existing row"
                );
                let mut existing = self
                    .store
                    .find_by_key(merchant_id, balance_date)
                    .await?
                    .ok_or_else(|| AggregatorError::aggregate_not_found(merchant_id, balance_date))?;
                existing.apply(kind, amount)?;
                self.store.persist(&existing).await?;
                Ok(existing)
            }
            Err(error) => Err(error),
        }
    }

    /// Process a decoded event, skipping transaction ids applied recently
    ///
    /// The id is recorded only after the aggregate was persisted, so a failed
    /// attempt is retried in full on redelivery.
    pub async fn process_event(
        &self,
        event: &InboundTransactionEvent,
    ) -> Result<ProcessOutcome, AggregatorError> {
        if self.processed.contains(event.transaction_id) {
            tracing::info!(
                transaction_id = %event.transaction_id,
                merchant_id = %event.merchant_id,
                "transaction already applied, skipping replay"
            );
            counter!("aggregates.duplicates").increment(1);
            return Ok(ProcessOutcome::Duplicate);
        }

        let aggregate = self
            .process(
                event.merchant_id,
                event.kind,
                event.amount,
                event.transaction_date,
            )
            .await?;

        self.processed.record(event.transaction_id);
        counter!("aggregates.updates", "type" => event.kind.as_str()).increment(1);

        Ok(ProcessOutcome::Applied(aggregate))
    }
}
