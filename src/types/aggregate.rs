//! Daily balance aggregate for one merchant
//!
//! This module defines the `BalanceAggregate` entity: the running credit and
//! debit totals for a single (merchant, calendar date) pair, together with the
//! accumulation rule that keeps `net_balance` consistent with its inputs.

use super::error::AggregatorError;
use super::event::{MerchantId, TransactionType};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Natural key of a balance aggregate
///
/// Ordering is by merchant first, then by date, which is the order reports
/// and range queries use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub merchant_id: MerchantId,
    pub balance_date: NaiveDate,
}

impl AggregateKey {
    pub fn new(merchant_id: MerchantId, balance_date: NaiveDate) -> Self {
        Self {
            merchant_id,
            balance_date,
        }
    }
}

/// Running balance for one merchant on one day
///
/// Fields are private so that `net_balance` can only change together with
/// the totals it is derived from.
///
/// # Invariants
///
/// - `net_balance == total_credits - total_debits` after every mutation
/// - totals never decrease (there is no reversal operation)
/// - `last_updated_at` never moves backwards
/// - `created_at` is set once
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceAggregate {
    id: Uuid,
    merchant_id: MerchantId,
    balance_date: NaiveDate,
    total_credits: Decimal,
    total_debits: Decimal,
    net_balance: Decimal,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl BalanceAggregate {
    /// Create an empty aggregate for the given key
    ///
    /// All totals start at zero and a fresh synthetic id is assigned.
    pub fn new(merchant_id: MerchantId, balance_date: NaiveDate) -> Self {
        Self::new_at(merchant_id, balance_date, Utc::now())
    }

    /// Create an empty aggregate with an explicit creation time
    pub fn new_at(merchant_id: MerchantId, balance_date: NaiveDate, now: DateTime<Utc>) -> Self {
        BalanceAggregate {
            id: Uuid::now_v7(),
            merchant_id,
            balance_date,
            total_credits: Decimal::ZERO,
            total_debits: Decimal::ZERO,
            net_balance: Decimal::ZERO,
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Rebuild an aggregate from persisted columns
    ///
    /// The stored net balance is not trusted; it is recomputed from the totals.
    pub fn restore(
        id: Uuid,
        key: AggregateKey,
        total_credits: Decimal,
        total_debits: Decimal,
        created_at: DateTime<Utc>,
        last_updated_at: DateTime<Utc>,
    ) -> Self {
        BalanceAggregate {
            id,
            merchant_id: key.merchant_id,
            balance_date: key.balance_date,
            total_credits,
            total_debits,
            net_balance: total_credits - total_debits,
            created_at,
            last_updated_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn merchant_id(&self) -> MerchantId {
        self.merchant_id
    }

    pub fn balance_date(&self) -> NaiveDate {
        self.balance_date
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey::new(self.merchant_id, self.balance_date)
    }

    pub fn total_credits(&self) -> Decimal {
        self.total_credits
    }

    pub fn total_debits(&self) -> Decimal {
        self.total_debits
    }

    pub fn net_balance(&self) -> Decimal {
        self.net_balance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// Add a credit to the running totals
    pub fn add_credit(&mut self, amount: Decimal) -> Result<(), AggregatorError> {
        self.apply(TransactionType::Credit, amount)
    }

    /// Add a debit to the running totals
    pub fn add_debit(&mut self, amount: Decimal) -> Result<(), AggregatorError> {
        self.apply(TransactionType::Debit, amount)
    }

    /// Accumulate an amount according to the transaction type
    pub fn apply(&mut self, kind: TransactionType, amount: Decimal) -> Result<(), AggregatorError> {
        self.apply_at(kind, amount, Utc::now())
    }

    /// Accumulate an amount with an explicit mutation time
    ///
    /// Uses checked arithmetic; on overflow the aggregate is left untouched.
    pub fn apply_at(
        &mut self,
        kind: TransactionType,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), AggregatorError> {
        let overflow = || {
            AggregatorError::arithmetic_overflow(kind.as_str(), self.merchant_id, self.balance_date)
        };

        let (credits, debits) = match kind {
            TransactionType::Credit => (
                self.total_credits.checked_add(amount).ok_or_else(overflow)?,
                self.total_debits,
            ),
            TransactionType::Debit => (
                self.total_credits,
                self.total_debits.checked_add(amount).ok_or_else(overflow)?,
            ),
        };
        let net = credits.checked_sub(debits).ok_or_else(overflow)?;

        self.total_credits = credits;
        self.total_debits = debits;
        self.net_balance = net;
        self.last_updated_at = self.last_updated_at.max(now);
        Ok(())
    }
}
