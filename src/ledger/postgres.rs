//! PostgreSQL Ledger Store.
//!
//! Runtime-bound queries only (no compile-time macro checking) so the
//! crate builds without a live database. Atomicity comes from SQL
//! transactions with `SELECT ... FOR UPDATE` on the user row; uniqueness
//! of idempotency keys and provider references is enforced by table
//! constraints, with the unique-violation path mapped back to
//! `Duplicate` outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use super::store::{CreditOutcome, DebitOutcome, LedgerError, LedgerStore};
use super::types::{Transaction, TransactionId, TxKind, TxStatus, UserId, UserRecord};
use crate::money::Amount;

/// Schema for the ledger tables. Applied idempotently at startup.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id              BIGSERIAL PRIMARY KEY,
    chat_id         TEXT NOT NULL UNIQUE,
    account_number  TEXT NOT NULL UNIQUE,
    balance_kobo    BIGINT NOT NULL DEFAULT 0 CHECK (balance_kobo >= 0),
    pin_hash        TEXT,
    pin_failed_attempts INT NOT NULL DEFAULT 0,
    pin_locked_until TIMESTAMPTZ,
    frozen          BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS transactions (
    id              TEXT PRIMARY KEY,
    user_id         BIGINT NOT NULL REFERENCES users(id),
    kind            SMALLINT NOT NULL,
    amount_kobo     BIGINT NOT NULL,
    fee_kobo        BIGINT NOT NULL DEFAULT 0,
    profit_kobo     BIGINT NOT NULL DEFAULT 0,
    idempotency_key TEXT NOT NULL UNIQUE,
    provider_ref    TEXT UNIQUE,
    status          SMALLINT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    settled_at      TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id);
CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);
"#;

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the ledger tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(LedgerError::from)?;
        Ok(())
    }

    fn map_user(row: &PgRow) -> Result<UserRecord, LedgerError> {
        Ok(UserRecord {
            id: row.try_get::<i64, _>("id")?,
            chat_id: row.try_get("chat_id")?,
            account_number: row.try_get("account_number")?,
            balance: Amount::from_kobo(row.try_get::<i64, _>("balance_kobo")?)
                .map_err(|e| LedgerError::Integrity(e.to_string()))?,
            pin_hash: row.try_get("pin_hash")?,
            pin_failed_attempts: row.try_get("pin_failed_attempts")?,
            pin_locked_until: row.try_get("pin_locked_until")?,
            frozen: row.try_get("frozen")?,
        })
    }

    fn map_tx(row: &PgRow) -> Result<Transaction, LedgerError> {
        let id: String = row.try_get("id")?;
        let kind: i16 = row.try_get("kind")?;
        let status: i16 = row.try_get("status")?;
        Ok(Transaction {
            id: TransactionId::from_str(&id)
                .map_err(|e| LedgerError::Integrity(format!("bad transaction id: {}", e)))?,
            user_id: row.try_get("user_id")?,
            kind: TxKind::from_id(kind)
                .ok_or_else(|| LedgerError::Integrity(format!("bad tx kind: {}", kind)))?,
            amount: Amount::from_kobo(row.try_get::<i64, _>("amount_kobo")?)
                .map_err(|e| LedgerError::Integrity(e.to_string()))?,
            fee: Amount::from_kobo(row.try_get::<i64, _>("fee_kobo")?)
                .map_err(|e| LedgerError::Integrity(e.to_string()))?,
            profit: Amount::from_kobo(row.try_get::<i64, _>("profit_kobo")?)
                .map_err(|e| LedgerError::Integrity(e.to_string()))?,
            idempotency_key: row.try_get("idempotency_key")?,
            provider_ref: row.try_get("provider_ref")?,
            status: TxStatus::from_id(status)
                .ok_or_else(|| LedgerError::Integrity(format!("bad tx status: {}", status)))?,
            created_at: row.try_get("created_at")?,
            settled_at: row.try_get("settled_at")?,
        })
    }

    async fn fetch_tx_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let sql = format!("SELECT * FROM transactions WHERE {} = $1", column);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_tx).transpose()
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn create_user(
        &self,
        chat_id: &str,
        account_number: &str,
    ) -> Result<UserRecord, LedgerError> {
        let row = sqlx::query(
            "INSERT INTO users (chat_id, account_number) VALUES ($1, $2) RETURNING *",
        )
        .bind(chat_id)
        .bind(account_number)
        .fetch_one(&self.pool)
        .await?;
        Self::map_user(&row)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_user).transpose()
    }

    async fn find_user_by_chat(&self, chat_id: &str) -> Result<Option<UserRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM users WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_user).transpose()
    }

    async fn find_user_by_account(
        &self,
        account_number: &str,
    ) -> Result<Option<UserRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM users WHERE account_number = $1")
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_user).transpose()
    }

    async fn set_pin_hash(&self, user_id: UserId, pin_hash: &str) -> Result<(), LedgerError> {
        let res = sqlx::query(
            "UPDATE users SET pin_hash = $2, pin_failed_attempts = 0, pin_locked_until = NULL \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(pin_hash)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound);
        }
        Ok(())
    }

    async fn record_pin_failure(
        &self,
        user_id: UserId,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), LedgerError> {
        let res = sqlx::query(
            "UPDATE users SET pin_failed_attempts = $2, pin_locked_until = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(failed_attempts)
        .bind(locked_until)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound);
        }
        Ok(())
    }

    async fn clear_pin_failures(&self, user_id: UserId) -> Result<(), LedgerError> {
        self.record_pin_failure(user_id, 0, None).await
    }

    async fn begin_debit(
        &self,
        user_id: UserId,
        kind: TxKind,
        amount: Amount,
        fee: Amount,
        profit: Amount,
        idempotency_key: &str,
    ) -> Result<DebitOutcome, LedgerError> {
        // Fast path: key already recorded
        if let Some(existing) = self.find_by_idempotency_key(idempotency_key).await? {
            return Ok(DebitOutcome::Duplicate(existing));
        }

        let total = amount
            .checked_add(fee)
            .map_err(|_| LedgerError::Storage("amount + fee overflow".to_string()))?;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT balance_kobo, frozen FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::UserNotFound)?;
        let frozen: bool = row.try_get("frozen")?;
        if frozen {
            return Err(LedgerError::AccountFrozen);
        }
        let balance: i64 = row.try_get("balance_kobo")?;
        if balance < total.kobo() {
            return Err(LedgerError::InsufficientFunds);
        }

        sqlx::query("UPDATE users SET balance_kobo = balance_kobo - $2 WHERE id = $1")
            .bind(user_id)
            .bind(total.kobo())
            .execute(&mut *tx)
            .await?;

        let id = TransactionId::new();
        let insert = sqlx::query(
            "INSERT INTO transactions \
             (id, user_id, kind, amount_kobo, fee_kobo, profit_kobo, idempotency_key, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(kind.id())
        .bind(amount.kobo())
        .bind(fee.kobo())
        .bind(profit.kobo())
        .bind(idempotency_key)
        .bind(TxStatus::Pending.id())
        .fetch_one(&mut *tx)
        .await;

        match insert {
            Ok(row) => {
                let created = Self::map_tx(&row)?;
                tx.commit().await?;
                Ok(DebitOutcome::Created(created))
            }
            Err(e) if is_unique_violation(&e) => {
                // Lost the race to a concurrent request with the same key.
                // The implicit rollback undoes our balance update.
                drop(tx);
                let existing = self
                    .find_by_idempotency_key(idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Storage("duplicate key but row not found".to_string())
                    })?;
                Ok(DebitOutcome::Duplicate(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete_debit(
        &self,
        id: TransactionId,
        provider_ref: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        let row = sqlx::query(
            "UPDATE transactions \
             SET status = $2, provider_ref = COALESCE($3, provider_ref), settled_at = NOW() \
             WHERE id = $1 AND status NOT IN ($4, $5) RETURNING *",
        )
        .bind(id.to_string())
        .bind(TxStatus::Completed.id())
        .bind(provider_ref)
        .bind(TxStatus::Completed.id())
        .bind(TxStatus::Failed.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::map_tx(&row),
            None => {
                // Either missing or already terminal; completed is idempotent.
                let existing = self
                    .fetch_tx_where("id", &id.to_string())
                    .await?
                    .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
                if existing.status == TxStatus::Completed {
                    Ok(existing)
                } else {
                    Err(LedgerError::AlreadyTerminal(id.to_string()))
                }
            }
        }
    }

    async fn fail_debit(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        let existing = Self::map_tx(&row)?;

        if existing.status.is_terminal() {
            if existing.status == TxStatus::Failed {
                return Ok(existing);
            }
            return Err(LedgerError::AlreadyTerminal(id.to_string()));
        }

        let refund = existing.amount.kobo() + existing.fee.kobo();
        sqlx::query("UPDATE users SET balance_kobo = balance_kobo + $2 WHERE id = $1")
            .bind(existing.user_id)
            .bind(refund)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            "UPDATE transactions SET status = $2, settled_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id.to_string())
        .bind(TxStatus::Failed.id())
        .fetch_one(&mut *tx)
        .await?;
        let failed = Self::map_tx(&row)?;

        tx.commit().await?;
        Ok(failed)
    }

    async fn mark_unsettled(&self, id: TransactionId) -> Result<(), LedgerError> {
        let res = sqlx::query(
            "UPDATE transactions SET status = $2 WHERE id = $1 AND status = $3",
        )
        .bind(id.to_string())
        .bind(TxStatus::Unsettled.id())
        .bind(TxStatus::Pending.id())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(LedgerError::AlreadyTerminal(id.to_string()));
        }
        Ok(())
    }

    async fn list_unsettled(
        &self,
        older_than: Duration,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let cutoff = Utc::now() - older_than;
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE status = $1 AND created_at <= $2 \
             ORDER BY created_at ASC LIMIT 100",
        )
        .bind(TxStatus::Unsettled.id())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_tx).collect()
    }

    async fn apply_credit(
        &self,
        user_id: UserId,
        amount: Amount,
        provider_ref: &str,
    ) -> Result<CreditOutcome, LedgerError> {
        if let Some(existing) = self.fetch_tx_where("provider_ref", provider_ref).await? {
            return Ok(CreditOutcome::Duplicate(existing));
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT frozen FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::UserNotFound)?;
        let frozen: bool = row.try_get("frozen")?;
        if frozen {
            return Err(LedgerError::AccountFrozen);
        }

        let id = TransactionId::new();
        let insert = sqlx::query(
            "INSERT INTO transactions \
             (id, user_id, kind, amount_kobo, idempotency_key, provider_ref, status, settled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) RETURNING *",
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(TxKind::Credit.id())
        .bind(amount.kobo())
        .bind(format!("credit:{}", provider_ref))
        .bind(provider_ref)
        .bind(TxStatus::Completed.id())
        .fetch_one(&mut *tx)
        .await;

        let applied = match insert {
            Ok(row) => Self::map_tx(&row)?,
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                let existing = self
                    .fetch_tx_where("provider_ref", provider_ref)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Storage("duplicate reference but row not found".to_string())
                    })?;
                return Ok(CreditOutcome::Duplicate(existing));
            }
            Err(e) => return Err(e.into()),
        };

        sqlx::query("UPDATE users SET balance_kobo = balance_kobo + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount.kobo())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CreditOutcome::Applied(applied))
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.fetch_tx_where("id", &id.to_string()).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.fetch_tx_where("idempotency_key", key).await
    }

    async fn audit_balance(&self, user_id: UserId) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT balance_kobo FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::UserNotFound)?;
        let balance: i64 = row.try_get("balance_kobo")?;

        let rows = sqlx::query("SELECT * FROM transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await?;
        let expected: i64 = rows
            .iter()
            .map(Self::map_tx)
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(Transaction::signed_amount)
            .sum();

        if balance != expected {
            sqlx::query("UPDATE users SET frozen = TRUE WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(LedgerError::Integrity(format!(
                "user {} balance {} != ledger sum {}",
                user_id, balance, expected
            )));
        }

        tx.commit().await?;
        Ok(())
    }
}
