//! Postgres-backed aggregate store
//!
//! Rows live in a `daily_balances` table with a unique index on
//! `(merchant_id, balance_date)`. [`PostgresAggregateStore::init_schema`]
//! creates it when missing. Amount columns are unbounded `NUMERIC` so totals
//! keep every digit a `Decimal` carries.
//!
//! A unique violation on insert surfaces as `DuplicateAggregate`, and an
//! update that matches no row as `AggregateNotFound`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::core::traits::AggregateStore;
use crate::types::{AggregateKey, AggregatorError, BalanceAggregate, MerchantId};

const SELECT_COLUMNS: &str = "id, merchant_id, balance_date, total_credits, total_debits, \
                              created_at, last_updated_at";

/// Aggregate store over a Postgres connection pool
#[derive(Debug, Clone)]
pub struct PostgresAggregateStore {
    pool: PgPool,
}

impl PostgresAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, AggregatorError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `daily_balances` table and its unique index if missing
    pub async fn init_schema(&self) -> Result<(), AggregatorError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_balances (
                id UUID PRIMARY KEY,
                merchant_id UUID NOT NULL,
                balance_date DATE NOT NULL,
                total_credits NUMERIC NOT NULL,
                total_debits NUMERIC NOT NULL,
                net_balance NUMERIC NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                last_updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS daily_balances_merchant_date
            ON daily_balances (merchant_id, balance_date)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn aggregate_from_row(row: &PgRow) -> Result<BalanceAggregate, AggregatorError> {
    let id: Uuid = row.try_get("id")?;
    let merchant_id: Uuid = row.try_get("merchant_id")?;
    let balance_date: NaiveDate = row.try_get("balance_date")?;
    let total_credits: Decimal = row.try_get("total_credits")?;
    let total_debits: Decimal = row.try_get("total_debits")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let last_updated_at: DateTime<Utc> = row.try_get("last_updated_at")?;

    Ok(BalanceAggregate::restore(
        id,
        AggregateKey::new(merchant_id, balance_date),
        total_credits,
        total_debits,
        created_at,
        last_updated_at,
    ))
}

#[async_trait]
impl AggregateStore for PostgresAggregateStore {
    async fn find_by_key(
        &self,
        merchant_id: MerchantId,
        date: NaiveDate,
    ) -> Result<Option<BalanceAggregate>, AggregatorError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_balances \
             WHERE merchant_id = $1 AND balance_date = $2"
        ))
        .bind(merchant_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(aggregate_from_row).transpose()
    }

    async fn find_by_range(
        &self,
        merchant_id: MerchantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BalanceAggregate>, AggregatorError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_balances \
             WHERE merchant_id = $1 AND balance_date BETWEEN $2 AND $3 \
             ORDER BY balance_date ASC"
        ))
        .bind(merchant_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(aggregate_from_row).collect()
    }

    async fn insert(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError> {
        let result = sqlx::query(
            r#"
            INSERT INTO daily_balances (
                id, merchant_id, balance_date, total_credits, total_debits,
                net_balance, created_at, last_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(aggregate.id())
        .bind(aggregate.merchant_id())
        .bind(aggregate.balance_date())
        .bind(aggregate.total_credits())
        .bind(aggregate.total_debits())
        .bind(aggregate.net_balance())
        .bind(aggregate.created_at())
        .bind(aggregate.last_updated_at())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AggregatorError::duplicate_aggregate(
                    aggregate.merchant_id(),
                    aggregate.balance_date(),
                ))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn persist(&self, aggregate: &BalanceAggregate) -> Result<(), AggregatorError> {
        let result = sqlx::query(
            r#"
            UPDATE daily_balances
            SET total_credits = $3,
                total_debits = $4,
                net_balance = $5,
                last_updated_at = $6
            WHERE merchant_id = $1 AND balance_date = $2
            "#,
        )
        .bind(aggregate.merchant_id())
        .bind(aggregate.balance_date())
        .bind(aggregate.total_credits())
        .bind(aggregate.total_debits())
        .bind(aggregate.net_balance())
        .bind(aggregate.last_updated_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AggregatorError::aggregate_not_found(
                aggregate.merchant_id(),
                aggregate.balance_date(),
            ));
        }

        Ok(())
    }

    async fn all(&self) -> Result<Vec<BalanceAggregate>, AggregatorError> {
        let rows = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM daily_balances"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(aggregate_from_row).collect()
    }
}
