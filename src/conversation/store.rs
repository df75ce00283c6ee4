//! Pending-transfer persistence.
//!
//! One pending transfer per user, enforced by a UNIQUE constraint on
//! `user_id`. Rows carry a TTL so abandoned conversations cannot pin a
//! user forever; the expiry sweeper purges them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use super::state::ConversationState;
use crate::ledger::UserId;
use crate::money::Amount;

/// Default conversation TTL.
pub const PENDING_TTL_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum PendingStoreError {
    #[error("Pending state is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for PendingStoreError {
    fn from(e: sqlx::Error) -> Self {
        PendingStoreError::Storage(e.to_string())
    }
}

/// Slots collected so far for an in-progress transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSlots {
    pub amount: Option<Amount>,
    pub account_number: Option<String>,
    pub bank_code: Option<String>,
    /// Provider-verified holder name, set when the account checks out
    pub account_name: Option<String>,
    /// Nickname the user referred to, when the recipient came from the
    /// beneficiary book
    pub nickname: Option<String>,
    /// Set after completion when the recipient is new; a yes saves it
    pub save_candidate: bool,
    /// Ledger idempotency key, fixed once the user confirms. A retried
    /// PIN entry or a crash mid-execution reuses it, so the debit can
    /// never double.
    pub reference: Option<String>,
}

/// A user's single in-progress transfer conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransfer {
    pub user_id: UserId,
    pub state: ConversationState,
    pub slots: TransferSlots,
    pub expires_at: DateTime<Utc>,
}

impl PendingTransfer {
    pub fn new(user_id: UserId, state: ConversationState, slots: TransferSlots) -> Self {
        Self {
            user_id,
            state,
            slots,
            expires_at: Utc::now() + Duration::minutes(PENDING_TTL_MINUTES),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Advance to `state`, refreshing the TTL. Every user turn buys the
    /// conversation another full window.
    pub fn advance(mut self, state: ConversationState) -> Self {
        self.state = state;
        self.expires_at = Utc::now() + Duration::minutes(PENDING_TTL_MINUTES);
        self
    }
}

#[async_trait]
pub trait PendingStateStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<PendingTransfer>, PendingStoreError>;

    /// Insert or replace the user's pending transfer.
    async fn upsert(&self, pending: &PendingTransfer) -> Result<(), PendingStoreError>;

    async fn delete(&self, user_id: UserId) -> Result<(), PendingStoreError>;

    /// Remove rows whose TTL elapsed, returning them so the caller can
    /// notify the owners.
    async fn purge_expired(&self) -> Result<Vec<PendingTransfer>, PendingStoreError>;
}

/// In-memory store for tests and the mock profile.
#[derive(Default)]
pub struct InMemoryPendingStore {
    rows: Mutex<HashMap<UserId, PendingTransfer>>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingStateStore for InMemoryPendingStore {
    async fn get(&self, user_id: UserId) -> Result<Option<PendingTransfer>, PendingStoreError> {
        Ok(self.rows.lock().unwrap().get(&user_id).cloned())
    }

    async fn upsert(&self, pending: &PendingTransfer) -> Result<(), PendingStoreError> {
        self.rows
            .lock()
            .unwrap()
            .insert(pending.user_id, pending.clone());
        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> Result<(), PendingStoreError> {
        self.rows.lock().unwrap().remove(&user_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<Vec<PendingTransfer>, PendingStoreError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let expired: Vec<PendingTransfer> = rows
            .values()
            .filter(|p| p.is_expired(now))
            .cloned()
            .collect();
        for p in &expired {
            rows.remove(&p.user_id);
        }
        Ok(expired)
    }
}

/// PostgreSQL-backed store. Slots are stored as a JSON document so slot
/// evolution does not require schema migrations.
pub struct PgPendingStore {
    pool: PgPool,
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_transfers (
    user_id     BIGINT PRIMARY KEY,
    state       SMALLINT NOT NULL,
    slots       TEXT NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_expires ON pending_transfers (expires_at);
"#;

impl PgPendingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), PendingStoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn map_row(row: &sqlx::postgres::PgRow) -> Result<PendingTransfer, PendingStoreError> {
        let state_id: i16 = row
            .try_get("state")
            .map_err(|e| PendingStoreError::Storage(e.to_string()))?;
        let state = ConversationState::from_id(state_id)
            .ok_or_else(|| PendingStoreError::Corrupt(format!("unknown state {}", state_id)))?;
        let slots_json: String = row
            .try_get("slots")
            .map_err(|e| PendingStoreError::Storage(e.to_string()))?;
        let slots: TransferSlots = serde_json::from_str(&slots_json)
            .map_err(|e| PendingStoreError::Corrupt(e.to_string()))?;
        Ok(PendingTransfer {
            user_id: row
                .try_get("user_id")
                .map_err(|e| PendingStoreError::Storage(e.to_string()))?,
            state,
            slots,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| PendingStoreError::Storage(e.to_string()))?,
        })
    }
}

#[async_trait]
impl PendingStateStore for PgPendingStore {
    async fn get(&self, user_id: UserId) -> Result<Option<PendingTransfer>, PendingStoreError> {
        let row = sqlx::query("SELECT user_id, state, slots, expires_at FROM pending_transfers WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn upsert(&self, pending: &PendingTransfer) -> Result<(), PendingStoreError> {
        let slots = serde_json::to_string(&pending.slots)
            .map_err(|e| PendingStoreError::Corrupt(e.to_string()))?;
        sqlx::query(
            "INSERT INTO pending_transfers (user_id, state, slots, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET state = EXCLUDED.state, slots = EXCLUDED.slots, expires_at = EXCLUDED.expires_at",
        )
        .bind(pending.user_id)
        .bind(pending.state.id())
        .bind(slots)
        .bind(pending.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> Result<(), PendingStoreError> {
        sqlx::query("DELETE FROM pending_transfers WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<Vec<PendingTransfer>, PendingStoreError> {
        let rows = sqlx::query(
            "DELETE FROM pending_transfers WHERE expires_at <= NOW() \
             RETURNING user_id, state, slots, expires_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_pending_per_user() {
        let store = InMemoryPendingStore::new();
        let first = PendingTransfer::new(1, ConversationState::AwaitingAmount, TransferSlots::default());
        store.upsert(&first).await.unwrap();

        let mut slots = TransferSlots::default();
        slots.amount = Some(Amount::from_naira(5000).unwrap());
        let second = PendingTransfer::new(1, ConversationState::RecipientResolved, slots);
        store.upsert(&second).await.unwrap();

        let got = store.get(1).await.unwrap().unwrap();
        assert_eq!(got.state, ConversationState::RecipientResolved);
        assert!(got.slots.amount.is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryPendingStore::new();
        let mut stale = PendingTransfer::new(1, ConversationState::AwaitingPin, TransferSlots::default());
        stale.expires_at = Utc::now() - Duration::minutes(1);
        store.upsert(&stale).await.unwrap();

        let fresh = PendingTransfer::new(2, ConversationState::AwaitingAmount, TransferSlots::default());
        store.upsert(&fresh).await.unwrap();

        let purged = store.purge_expired().await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].user_id, 1);
        assert!(store.get(1).await.unwrap().is_none());
        assert!(store.get(2).await.unwrap().is_some());
    }

    #[test]
    fn test_advance_refreshes_ttl() {
        let mut p = PendingTransfer::new(1, ConversationState::AwaitingAmount, TransferSlots::default());
        p.expires_at = Utc::now() + Duration::minutes(1);
        let advanced = p.advance(ConversationState::RecipientResolved);
        assert_eq!(advanced.state, ConversationState::RecipientResolved);
        assert!(advanced.expires_at > Utc::now() + Duration::minutes(PENDING_TTL_MINUTES - 1));
    }

    #[test]
    fn test_slots_json_roundtrip() {
        let slots = TransferSlots {
            amount: Some(Amount::from_naira(2000).unwrap()),
            account_number: Some("0123456789".into()),
            bank_code: Some("058".into()),
            account_name: Some("ADA OBI".into()),
            nickname: None,
            save_candidate: true,
            reference: Some("01J0000000000000000000TEST".into()),
        };
        let json = serde_json::to_string(&slots).unwrap();
        let back: TransferSlots = serde_json::from_str(&json).unwrap();
        assert_eq!(back, slots);
    }
}
