//! Profit Ledger: fee/profit accounting and virtual withdrawals.
//!
//! Every completed fee-bearing transaction gets one ProfitRecord.
//! Withdrawals are accounting entries only, no real funds move, and
//! may never exceed cumulative profit.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;

use crate::ledger::{Transaction, TransactionId, TxKind};
use crate::money::Amount;

#[derive(Debug, Error)]
pub enum ProfitError {
    #[error("Profit {profit} exceeds fee {fee}")]
    ProfitExceedsFee { fee: Amount, profit: Amount },

    #[error("Withdrawal of {requested} exceeds available profit {available}")]
    ExceedsAvailable {
        requested: Amount,
        available: Amount,
    },

    #[error("Profit already recorded for transaction {0}")]
    AlreadyRecorded(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for ProfitError {
    fn from(e: sqlx::Error) -> Self {
        ProfitError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitRecord {
    pub transaction_id: TransactionId,
    pub kind: TxKind,
    pub base: Amount,
    pub fee: Amount,
    pub profit: Amount,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalRecord {
    pub id: i64,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// Aggregate over a kind/time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ProfitSummary {
    pub count: u64,
    pub total_fees: Amount,
    pub total_profit: Amount,
}

#[async_trait]
pub trait ProfitStore: Send + Sync {
    /// Record fee/profit for a completed transaction. One record per
    /// transaction; `profit <= fee` is enforced here as a last line of
    /// defense.
    async fn record(&self, tx: &Transaction) -> Result<(), ProfitError>;

    /// Aggregate profit, optionally filtered by kind and/or window start.
    async fn summarize(
        &self,
        kind: Option<TxKind>,
        since: Option<DateTime<Utc>>,
    ) -> Result<ProfitSummary, ProfitError>;

    /// Profit not yet claimed by withdrawals.
    async fn available(&self) -> Result<Amount, ProfitError>;

    /// Record a virtual withdrawal. Fails if it would push cumulative
    /// withdrawals past cumulative profit.
    async fn withdraw(&self, amount: Amount) -> Result<WithdrawalRecord, ProfitError>;
}

#[derive(Default)]
struct MemoryInner {
    records: Vec<ProfitRecord>,
    withdrawals: Vec<WithdrawalRecord>,
}

/// In-memory profit ledger for tests and local development.
#[derive(Default)]
pub struct InMemoryProfitLedger {
    inner: Mutex<MemoryInner>,
}

impl InMemoryProfitLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfitStore for InMemoryProfitLedger {
    async fn record(&self, tx: &Transaction) -> Result<(), ProfitError> {
        if tx.profit > tx.fee {
            return Err(ProfitError::ProfitExceedsFee {
                fee: tx.fee,
                profit: tx.profit,
            });
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.records.iter().any(|r| r.transaction_id == tx.id) {
            return Err(ProfitError::AlreadyRecorded(tx.id.to_string()));
        }
        inner.records.push(ProfitRecord {
            transaction_id: tx.id,
            kind: tx.kind,
            base: tx.amount,
            fee: tx.fee,
            profit: tx.profit,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn summarize(
        &self,
        kind: Option<TxKind>,
        since: Option<DateTime<Utc>>,
    ) -> Result<ProfitSummary, ProfitError> {
        let inner = self.inner.lock().unwrap();
        let mut summary = ProfitSummary::default();
        for r in inner.records.iter() {
            if kind.is_some_and(|k| k != r.kind) {
                continue;
            }
            if since.is_some_and(|s| r.created_at < s) {
                continue;
            }
            summary.count += 1;
            summary.total_fees = summary
                .total_fees
                .checked_add(r.fee)
                .map_err(|e| ProfitError::Storage(e.to_string()))?;
            summary.total_profit = summary
                .total_profit
                .checked_add(r.profit)
                .map_err(|e| ProfitError::Storage(e.to_string()))?;
        }
        Ok(summary)
    }

    async fn available(&self) -> Result<Amount, ProfitError> {
        let inner = self.inner.lock().unwrap();
        let earned: i64 = inner.records.iter().map(|r| r.profit.kobo()).sum();
        let withdrawn: i64 = inner.withdrawals.iter().map(|w| w.amount.kobo()).sum();
        Amount::from_kobo(earned - withdrawn).map_err(|e| ProfitError::Storage(e.to_string()))
    }

    async fn withdraw(&self, amount: Amount) -> Result<WithdrawalRecord, ProfitError> {
        let available = self.available().await?;
        let mut inner = self.inner.lock().unwrap();
        if amount > available {
            return Err(ProfitError::ExceedsAvailable {
                requested: amount,
                available,
            });
        }
        let record = WithdrawalRecord {
            id: inner.withdrawals.len() as i64 + 1,
            amount,
            created_at: Utc::now(),
        };
        inner.withdrawals.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TxStatus;

    fn completed_tx(amount: i64, fee: i64, profit: i64) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            user_id: 1,
            kind: TxKind::Transfer,
            amount: Amount::from_naira(amount).unwrap(),
            fee: Amount::from_naira(fee).unwrap(),
            profit: Amount::from_naira(profit).unwrap(),
            idempotency_key: ulid::Ulid::new().to_string(),
            provider_ref: None,
            status: TxStatus::Completed,
            created_at: Utc::now(),
            settled_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_record_and_summarize() {
        let ledger = InMemoryProfitLedger::new();
        ledger.record(&completed_tx(5000, 30, 10)).await.unwrap();
        ledger.record(&completed_tx(2000, 30, 10)).await.unwrap();

        let summary = ledger.summarize(Some(TxKind::Transfer), None).await.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.total_fees, Amount::from_naira(60).unwrap());
        assert_eq!(summary.total_profit, Amount::from_naira(20).unwrap());

        let none = ledger.summarize(Some(TxKind::Airtime), None).await.unwrap();
        assert_eq!(none.count, 0);
    }

    #[tokio::test]
    async fn test_profit_bound_enforced() {
        let ledger = InMemoryProfitLedger::new();
        let err = ledger.record(&completed_tx(5000, 10, 30)).await.unwrap_err();
        assert!(matches!(err, ProfitError::ProfitExceedsFee { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_record_rejected() {
        let ledger = InMemoryProfitLedger::new();
        let tx = completed_tx(5000, 30, 10);
        ledger.record(&tx).await.unwrap();
        let err = ledger.record(&tx).await.unwrap_err();
        assert!(matches!(err, ProfitError::AlreadyRecorded(_)));
    }

    #[tokio::test]
    async fn test_withdrawals_bounded_by_profit() {
        let ledger = InMemoryProfitLedger::new();
        ledger.record(&completed_tx(5000, 30, 10)).await.unwrap();
        ledger.record(&completed_tx(5000, 30, 10)).await.unwrap();
        assert_eq!(ledger.available().await.unwrap(), Amount::from_naira(20).unwrap());

        ledger.withdraw(Amount::from_naira(15).unwrap()).await.unwrap();
        assert_eq!(ledger.available().await.unwrap(), Amount::from_naira(5).unwrap());

        let err = ledger
            .withdraw(Amount::from_naira(6).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfitError::ExceedsAvailable { .. }));
    }
}
