//! Store doubles for unit tests
//!
//! `FlakyStore` wraps an [`InMemoryAggregateStore`] and can be told to fail
//! calls or to lose the next creation race, which is how the consumer and use
//! case tests exercise the downstream-failure paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::core::aggregate_store::InMemoryAggregateStore;
use crate::core::traits::AggregateStore;
use crate::types::{AggregatorError, BalanceAggregate, MerchantId};

#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryAggregateStore,
    unavailable: AtomicBool,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    competitor_credit: Mutex<Option<Decimal>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail every call until switched back
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` calls
    pub(crate) fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Before the next insert, let a competing writer create the same key
    /// holding `credit`
    pub(crate) fn lose_next_insert(&self, credit: Decimal) {
        *self.competitor_credit.lock().unwrap() = Some(credit);
    }

    /// Number of store calls that reached this double
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(&self, operation: &str) -> Result<(), AggregatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AggregatorError::downstream(operation, "store unavailable"));
        }

        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(AggregatorError::downstream(operation, "injected failure"));
        }

        Ok(())
    }
}

#[async_trait]
impl AggregateStore for FlakyStore {
    async fn find_by_key(
        &self,
        merchant_id: MerchantId,
        date: NaiveDate,
    ) -> Result<Option<BalanceAggregate>, AggregatorError> {
        self.check("find_by_key")?;
        self.inner.find_by_key(merchant_id, date).await
    }

    async fn find_by_range(
        &self,
        merchant_id: MerchantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BalanceAggregate>, AggregatorError> {
        self.check("find_by_range")?;
        self.inner.find_by_range(merchant_id, start, end).await
    }

    async fn insert(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError> {
        self.check("insert")?;

        let competitor = self.competitor_credit.lock().unwrap().take();
        if let Some(credit) = competitor {
            let mut winner =
                BalanceAggregate::new(aggregate.merchant_id(), aggregate.balance_date());
            winner.add_credit(credit)?;
            self.inner.insert(&winner).await?;
        }

        self.inner.insert(aggregate).await
    }

    async fn persist(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError> {
        self.check("persist")?;
        self.inner.persist(aggregate).await
    }

    async fn all(&self) -> Result<Vec<BalanceAggregate>, AggregatorError> {
        self.check("all")?;
        self.inner.all().await
    }
}
