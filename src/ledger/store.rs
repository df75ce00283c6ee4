//! Ledger Store port.
//!
//! Every balance mutation in the system goes through this trait. The
//! operations are deliberately coarse: each one is atomic in the
//! implementation (single storage transaction), so callers never see a
//! debited balance without its ledger row or vice versa.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::types::{Transaction, TransactionId, TxKind, UserId, UserRecord};
use crate::money::Amount;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("User not found")]
    UserNotFound,

    #[error("Account is frozen pending manual review")]
    AccountFrozen,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transaction is already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("Ledger integrity violation: {0}")]
    Integrity(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

/// Outcome of an idempotent debit attempt.
#[derive(Debug, Clone)]
pub enum DebitOutcome {
    /// A new pending debit was created and the balance reduced
    Created(Transaction),
    /// The idempotency key was seen before; this is the original row,
    /// untouched. No balance change happened.
    Duplicate(Transaction),
}

impl DebitOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            DebitOutcome::Created(tx) | DebitOutcome::Duplicate(tx) => tx,
        }
    }
}

/// Outcome of an idempotent credit attempt.
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    Applied(Transaction),
    /// Provider reference was seen before; no balance change happened.
    Duplicate(Transaction),
}

/// Durable balances + immutable transaction records.
///
/// Uniqueness constraints (`idempotency_key`, `provider_ref`,
/// one user per account number) are enforced by the implementation and
/// are the primary defense against duplicate effects.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // === Users ===

    async fn create_user(
        &self,
        chat_id: &str,
        account_number: &str,
    ) -> Result<UserRecord, LedgerError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, LedgerError>;

    async fn find_user_by_chat(&self, chat_id: &str) -> Result<Option<UserRecord>, LedgerError>;

    async fn find_user_by_account(
        &self,
        account_number: &str,
    ) -> Result<Option<UserRecord>, LedgerError>;

    // === PIN / lockout bookkeeping ===

    async fn set_pin_hash(&self, user_id: UserId, pin_hash: &str) -> Result<(), LedgerError>;

    async fn record_pin_failure(
        &self,
        user_id: UserId,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), LedgerError>;

    /// Reset the failure counter. Called only on successful verification.
    async fn clear_pin_failures(&self, user_id: UserId) -> Result<(), LedgerError>;

    // === Debits ===

    /// Atomically check balance, debit `amount + fee`, and insert a PENDING
    /// transaction keyed by `idempotency_key`.
    ///
    /// A repeated key returns `Duplicate` with the original row and has no
    /// effect. Fails with `InsufficientFunds` if the debit would drive the
    /// balance negative, `AccountFrozen` if the account is under review.
    async fn begin_debit(
        &self,
        user_id: UserId,
        kind: TxKind,
        amount: Amount,
        fee: Amount,
        profit: Amount,
        idempotency_key: &str,
    ) -> Result<DebitOutcome, LedgerError>;

    /// PENDING/UNSETTLED → COMPLETED. Records the provider reference and
    /// settlement time. The row is immutable afterwards.
    async fn complete_debit(
        &self,
        id: TransactionId,
        provider_ref: Option<&str>,
    ) -> Result<Transaction, LedgerError>;

    /// PENDING/UNSETTLED → FAILED, atomically refunding `amount + fee`.
    async fn fail_debit(&self, id: TransactionId) -> Result<Transaction, LedgerError>;

    /// PENDING → UNSETTLED. The outcome is unknown; only the settlement
    /// worker may move it further.
    async fn mark_unsettled(&self, id: TransactionId) -> Result<(), LedgerError>;

    /// Unsettled rows last touched more than `older_than` ago.
    async fn list_unsettled(&self, older_than: Duration) -> Result<Vec<Transaction>, LedgerError>;

    // === Credits ===

    /// Atomically insert a COMPLETED credit keyed by `provider_ref` and
    /// increase the balance. A repeated reference returns `Duplicate` with
    /// no effect.
    async fn apply_credit(
        &self,
        user_id: UserId,
        amount: Amount,
        provider_ref: &str,
    ) -> Result<CreditOutcome, LedgerError>;

    // === Lookup ===

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    // === Audit ===

    /// Verify balance == Σ signed transaction amounts for the user.
    ///
    /// On mismatch the account is frozen and `Integrity` returned; the
    /// discrepancy is never auto-corrected.
    async fn audit_balance(&self, user_id: UserId) -> Result<(), LedgerError>;
}
