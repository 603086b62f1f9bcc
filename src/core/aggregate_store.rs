//! Thread-safe in-memory aggregate store
//!
//! This module provides the `InMemoryAggregateStore`, an [`AggregateStore`]
//! backed by a `DashMap` keyed on the natural key `(merchant_id, balance_date)`.
//!
//! # Design
//!
//! The map key *is* the unique constraint: inserting goes through the entry
//! API, so when two first events for the same key race, exactly one insert
//! wins and the other observes `DuplicateAggregate`, the same contract a
//! database unique index gives.
//!
//! # Thread Safety
//!
//! DashMap shards its locks internally. Operations on different keys proceed
//! in parallel and operations on the same key are serialized. No lock is held
//! across an `.await`.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::core::traits::AggregateStore;
use crate::types::{AggregateKey, AggregatorError, BalanceAggregate, MerchantId};

/// In-memory aggregate store
#[derive(Debug, Default)]
pub struct InMemoryAggregateStore {
    /// Aggregates by natural key
    aggregates: DashMap<AggregateKey, BalanceAggregate>,
}

impl InMemoryAggregateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            aggregates: DashMap::new(),
        }
    }

    /// Number of aggregates held
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn find_by_key(
        &self,
        merchant_id: MerchantId,
        date: NaiveDate,
    ) -> Result<Option<BalanceAggregate>, AggregatorError> {
        Ok(self
            .aggregates
            .get(&AggregateKey::new(merchant_id, date))
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_range(
        &self,
        merchant_id: MerchantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BalanceAggregate>, AggregatorError> {
        let mut found: Vec<BalanceAggregate> = self
            .aggregates
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.merchant_id == merchant_id
                    && key.balance_date >= start
                    && key.balance_date <= end
            })
            .map(|entry| entry.value().clone())
            .collect();

        found.sort_by_key(|aggregate| aggregate.balance_date());
        Ok(found)
    }

    async fn insert(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError> {
        let mut inserted = false;
        self.aggregates.entry(aggregate.key()).or_insert_with(|| {
            inserted = true;
            aggregate.clone()
        });

        if inserted {
            Ok(())
        } else {
            Err(AggregatorError::duplicate_aggregate(
                aggregate.merchant_id(),
                aggregate.balance_date(),
            ))
        }
    }

    async fn persist(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError> {
        match self.aggregates.get_mut(&aggregate.key()) {
            Some(mut entry) => {
                *entry.value_mut() = aggregate.clone();
                Ok(())
            }
            None => Err(AggregatorError::aggregate_not_found(
                aggregate.merchant_id(),
                aggregate.balance_date(),
            )),
        }
    }

    async fn all(&self) -> Result<Vec<BalanceAggregate>, AggregatorError> {
        Ok(self
            .aggregates
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}
