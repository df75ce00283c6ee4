//! Ledger core types.
//!
//! Status IDs are designed for PostgreSQL storage as SMALLINT.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::money::Amount;

/// User identifier.
pub type UserId = i64;

/// Transaction ID - ULID-based unique identifier.
///
/// ULIDs are monotonic and sortable with no coordination needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// What kind of operation a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TxKind {
    /// Outbound bank transfer via the disbursement provider
    Transfer = 1,
    /// Inbound deposit credited from a provider webhook
    Credit = 2,
    /// Airtime purchase
    Airtime = 3,
}

impl TxKind {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TxKind::Transfer),
            2 => Some(TxKind::Credit),
            3 => Some(TxKind::Airtime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Transfer => "TRANSFER",
            TxKind::Credit => "CREDIT",
            TxKind::Airtime => "AIRTIME",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle status.
///
/// Terminal states: COMPLETED (20), FAILED (-10). UNSETTLED (30) is
/// terminal-pending: the true outcome is unknown until the settlement
/// worker resolves it against the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TxStatus {
    /// Debit applied, disbursement in flight
    Pending = 10,
    /// Terminal: effects committed, balance reflects this row
    Completed = 20,
    /// Provider outcome unknown; must not be reversed without a status check
    Unsettled = 30,
    /// Terminal: explicitly declined, debit refunded
    Failed = -10,
}

impl TxStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed)
    }

    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            10 => Some(TxStatus::Pending),
            20 => Some(TxStatus::Completed),
            30 => Some(TxStatus::Unsettled),
            -10 => Some(TxStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Completed => "COMPLETED",
            TxStatus::Unsettled => "UNSETTLED",
            TxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable ledger row.
///
/// Once `status` is COMPLETED or FAILED the row never changes again.
/// `signed_amount()` is the row's contribution to the owner's balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TxKind,
    /// Principal moved (excludes fee)
    pub amount: Amount,
    /// Fee charged to the user on top of `amount` (zero for credits)
    pub fee: Amount,
    /// Share of `fee` retained after provider cost
    pub profit: Amount,
    /// Caller-supplied dedup token; also the provider-side reference for debits
    pub idempotency_key: String,
    /// Provider's reference, unique when present (webhook reference for credits)
    pub provider_ref: Option<String>,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Contribution to the owner's balance while in `status`.
    ///
    /// Credits add `amount`; debits subtract `amount + fee`. Failed rows
    /// contribute nothing (the refund restored the balance).
    pub fn signed_amount(&self) -> i64 {
        match self.status {
            TxStatus::Failed => 0,
            _ => match self.kind {
                TxKind::Credit => self.amount.kobo(),
                TxKind::Transfer | TxKind::Airtime => -(self.amount.kobo() + self.fee.kobo()),
            },
        }
    }
}

/// A user row as the ledger sees it.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    /// Chat transport identifier for outbound messages
    pub chat_id: String,
    /// Virtual account number deposits arrive on
    pub account_number: String,
    pub balance: Amount,
    /// Argon2 PHC string; None until the user sets a PIN
    pub pin_hash: Option<String>,
    pub pin_failed_attempts: i32,
    pub pin_locked_until: Option<DateTime<Utc>>,
    /// Set when a ledger invariant violation was detected; all processing
    /// for this account halts pending manual review
    pub frozen: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            TxStatus::Pending,
            TxStatus::Completed,
            TxStatus::Unsettled,
            TxStatus::Failed,
        ] {
            assert_eq!(TxStatus::from_id(s.id()), Some(s));
        }
        assert_eq!(TxStatus::from_id(999), None);
    }

    #[test]
    fn test_kind_roundtrip() {
        for k in [TxKind::Transfer, TxKind::Credit, TxKind::Airtime] {
            assert_eq!(TxKind::from_id(k.id()), Some(k));
        }
        assert_eq!(TxKind::from_id(0), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TxStatus::Completed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::Unsettled.is_terminal());
    }

    #[test]
    fn test_signed_amount() {
        let mut tx = Transaction {
            id: TransactionId::new(),
            user_id: 1,
            kind: TxKind::Transfer,
            amount: Amount::from_naira(5000).unwrap(),
            fee: Amount::from_naira(30).unwrap(),
            profit: Amount::from_naira(10).unwrap(),
            idempotency_key: "k1".into(),
            provider_ref: None,
            status: TxStatus::Completed,
            created_at: Utc::now(),
            settled_at: None,
        };
        assert_eq!(tx.signed_amount(), -503_000);

        tx.status = TxStatus::Failed;
        assert_eq!(tx.signed_amount(), 0);

        tx.kind = TxKind::Credit;
        tx.status = TxStatus::Completed;
        tx.fee = Amount::ZERO;
        assert_eq!(tx.signed_amount(), 500_000);
    }
}
