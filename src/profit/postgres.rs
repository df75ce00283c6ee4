//! PostgreSQL profit ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::{ProfitError, ProfitStore, ProfitSummary, WithdrawalRecord};
use crate::ledger::{Transaction, TxKind};
use crate::money::Amount;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profit_records (
    transaction_id  TEXT PRIMARY KEY REFERENCES transactions(id),
    kind            SMALLINT NOT NULL,
    base_kobo       BIGINT NOT NULL,
    fee_kobo        BIGINT NOT NULL,
    profit_kobo     BIGINT NOT NULL CHECK (profit_kobo <= fee_kobo),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS profit_withdrawals (
    id              BIGSERIAL PRIMARY KEY,
    amount_kobo     BIGINT NOT NULL CHECK (amount_kobo > 0),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

pub struct PgProfitLedger {
    pool: PgPool,
}

impl PgProfitLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), ProfitError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn available_in(
        executor: impl sqlx::PgExecutor<'_>,
    ) -> Result<Amount, ProfitError> {
        let row = sqlx::query(
            "SELECT COALESCE((SELECT SUM(profit_kobo) FROM profit_records), 0) \
                  - COALESCE((SELECT SUM(amount_kobo) FROM profit_withdrawals), 0) AS available",
        )
        .fetch_one(executor)
        .await?;
        let available: i64 = row.try_get("available")?;
        Amount::from_kobo(available).map_err(|e| ProfitError::Storage(e.to_string()))
    }
}

#[async_trait]
impl ProfitStore for PgProfitLedger {
    async fn record(&self, tx: &Transaction) -> Result<(), ProfitError> {
        if tx.profit > tx.fee {
            return Err(ProfitError::ProfitExceedsFee {
                fee: tx.fee,
                profit: tx.profit,
            });
        }
        let res = sqlx::query(
            "INSERT INTO profit_records (transaction_id, kind, base_kobo, fee_kobo, profit_kobo) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(tx.id.to_string())
        .bind(tx.kind.id())
        .bind(tx.amount.kobo())
        .bind(tx.fee.kobo())
        .bind(tx.profit.kobo())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(ProfitError::AlreadyRecorded(tx.id.to_string()));
        }
        Ok(())
    }

    async fn summarize(
        &self,
        kind: Option<TxKind>,
        since: Option<DateTime<Utc>>,
    ) -> Result<ProfitSummary, ProfitError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt, \
                    COALESCE(SUM(fee_kobo), 0) AS fees, \
                    COALESCE(SUM(profit_kobo), 0) AS profit \
             FROM profit_records \
             WHERE ($1::SMALLINT IS NULL OR kind = $1) \
               AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)",
        )
        .bind(kind.map(|k| k.id()))
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProfitSummary {
            count: row.try_get::<i64, _>("cnt")? as u64,
            total_fees: Amount::from_kobo(row.try_get::<i64, _>("fees")?)
                .map_err(|e| ProfitError::Storage(e.to_string()))?,
            total_profit: Amount::from_kobo(row.try_get::<i64, _>("profit")?)
                .map_err(|e| ProfitError::Storage(e.to_string()))?,
        })
    }

    async fn available(&self) -> Result<Amount, ProfitError> {
        Self::available_in(&self.pool).await
    }

    async fn withdraw(&self, amount: Amount) -> Result<WithdrawalRecord, ProfitError> {
        let mut tx = self.pool.begin().await?;

        // Serialize withdrawals so two concurrent requests cannot both
        // pass the availability check.
        sqlx::query("LOCK TABLE profit_withdrawals IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let available = Self::available_in(&mut *tx).await?;
        if amount > available {
            return Err(ProfitError::ExceedsAvailable {
                requested: amount,
                available,
            });
        }

        let row = sqlx::query(
            "INSERT INTO profit_withdrawals (amount_kobo) VALUES ($1) \
             RETURNING id, amount_kobo, created_at",
        )
        .bind(amount.kobo())
        .fetch_one(&mut *tx)
        .await?;

        let record = WithdrawalRecord {
            id: row.try_get("id")?,
            amount: Amount::from_kobo(row.try_get::<i64, _>("amount_kobo")?)
                .map_err(|e| ProfitError::Storage(e.to_string()))?,
            created_at: row.try_get("created_at")?,
        };

        tx.commit().await?;
        Ok(record)
    }
}
