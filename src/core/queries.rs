//! Read-side queries over daily balances
//!
//! `BalanceQueries` answers "what was merchant M's balance on day D" and the
//! same for an inclusive range of days, returning [`DailyBalanceView`]s in the
//! shape the query API serves.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::core::traits::AggregateStore;
use crate::types::{AggregatorError, BalanceAggregate, MerchantId};

/// Serialized view of one daily balance
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBalanceView {
    pub id: Uuid,
    pub merchant_id: MerchantId,
    pub balance_date: NaiveDate,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub net_balance: Decimal,
    pub last_updated_at: DateTime<Utc>,
}

impl From<&BalanceAggregate> for DailyBalanceView {
    fn from(aggregate: &BalanceAggregate) -> Self {
        Self {
            id: aggregate.id(),
            merchant_id: aggregate.merchant_id(),
            balance_date: aggregate.balance_date(),
            total_credits: aggregate.total_credits(),
            total_debits: aggregate.total_debits(),
            net_balance: aggregate.net_balance(),
            last_updated_at: aggregate.last_updated_at(),
        }
    }
}

/// Point and range lookups of daily balances
#[derive(Clone)]
pub struct BalanceQueries {
    store: Arc<dyn AggregateStore>,
}

impl BalanceQueries {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Balance of one merchant on one day, `None` if nothing was aggregated
    pub async fn daily_balance(
        &self,
        merchant_id: MerchantId,
        date: NaiveDate,
    ) -> Result<Option<DailyBalanceView>, AggregatorError> {
        let found = self.store.find_by_key(merchant_id, date).await?;
        Ok(found.as_ref().map(DailyBalanceView::from))
    }

    /// Balances of one merchant between `start` and `end`, both inclusive
    ///
    /// Days without activity are absent rather than zero-filled. Results are
    /// ascending by date.
    ///
    /// # Errors
    ///
    /// `InvalidDateRange` when `start` is after `end`; the store is not queried.
    pub async fn daily_balance_range(
        &self,
        merchant_id: MerchantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBalanceView>, AggregatorError> {
        if start > end {
            return Err(AggregatorError::invalid_date_range(start, end));
        }

        let found = self.store.find_by_range(merchant_id, start, end).await?;
        Ok(found.iter().map(DailyBalanceView::from).collect())
    }
}
