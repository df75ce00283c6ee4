//! Transfer execution.
//!
//! The one place money actually moves: debit first, then disburse, then
//! settle the ledger row according to what the provider said. The
//! cardinal rule is that an unknown provider outcome is never treated as
//! a failure; it parks the row as UNSETTLED for the settlement worker.

pub mod settlement;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::fees::FeePolicy;
use crate::ledger::{
    DebitOutcome, LedgerError, LedgerStore, Transaction, TxKind, TxStatus, UserId,
};
use crate::money::Amount;
use crate::profit::{ProfitError, ProfitStore};
use crate::provider::{DisburseStatus, DisbursementProvider, ProviderError};

pub use settlement::{SettlementStats, SettlementWorker};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Profit recording failed: {0}")]
    Profit(String),
}

/// Retry envelope for the provider call. The ledger debit itself is
/// never retried; only the disbursement leg is.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// What an execution attempt resolved to.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    Completed(Transaction),
    Failed { tx: Transaction, reason: String },
    /// Provider outcome unknown; the settlement worker owns it now
    Unsettled(Transaction),
}

impl ExecuteOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            ExecuteOutcome::Completed(tx)
            | ExecuteOutcome::Failed { tx, .. }
            | ExecuteOutcome::Unsettled(tx) => tx,
        }
    }
}

pub struct TransferExecutor {
    ledger: Arc<dyn LedgerStore>,
    provider: Arc<dyn DisbursementProvider>,
    profit: Arc<dyn ProfitStore>,
    fees: FeePolicy,
    config: ExecutorConfig,
}

impl TransferExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        provider: Arc<dyn DisbursementProvider>,
        profit: Arc<dyn ProfitStore>,
        fees: FeePolicy,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            ledger,
            provider,
            profit,
            fees,
            config,
        }
    }

    /// Execute a transfer end to end.
    ///
    /// Idempotent on `idempotency_key`: a repeated call returns the
    /// outcome of the original attempt without moving money again. The
    /// key also travels to the provider as the disbursement reference,
    /// so provider-side dedup lines up with ours.
    pub async fn execute(
        &self,
        user_id: UserId,
        amount: Amount,
        account_number: &str,
        bank_code: &str,
        idempotency_key: &str,
    ) -> Result<ExecuteOutcome, ExecutorError> {
        let quote = self.fees.quote(TxKind::Transfer, amount);

        let tx = match self
            .ledger
            .begin_debit(
                user_id,
                TxKind::Transfer,
                quote.principal,
                quote.fee,
                quote.profit,
                idempotency_key,
            )
            .await?
        {
            DebitOutcome::Created(tx) => tx,
            DebitOutcome::Duplicate(tx) => {
                info!(key = idempotency_key, status = %tx.status, "Duplicate execution attempt");
                return Ok(self.outcome_of(tx));
            }
        };

        info!(
            tx_id = %tx.id,
            user_id,
            amount = quote.principal.kobo(),
            fee = quote.fee.kobo(),
            "Debit applied, disbursing"
        );

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .provider
                .disburse(quote.principal, account_number, bank_code, idempotency_key)
                .await
            {
                Ok(receipt) => {
                    return match receipt.status {
                        DisburseStatus::Success => {
                            let tx = self
                                .ledger
                                .complete_debit(tx.id, Some(&receipt.provider_ref))
                                .await?;
                            self.record_profit(&tx).await?;
                            info!(tx_id = %tx.id, provider_ref = receipt.provider_ref, "Transfer completed");
                            Ok(ExecuteOutcome::Completed(tx))
                        }
                        DisburseStatus::Declined(reason) => {
                            let tx = self.ledger.fail_debit(tx.id).await?;
                            warn!(tx_id = %tx.id, reason, "Transfer declined, debit refunded");
                            Ok(ExecuteOutcome::Failed { tx, reason })
                        }
                        DisburseStatus::Pending => {
                            self.ledger.mark_unsettled(tx.id).await?;
                            let tx = self.fetch(tx.id).await?;
                            info!(tx_id = %tx.id, "Provider accepted, awaiting settlement");
                            Ok(ExecuteOutcome::Unsettled(tx))
                        }
                    };
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        tx_id = %tx.id,
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Disbursement attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(ProviderError::InvalidAccount(detail)) => {
                    // Rejected at validation, before any payout
                    let tx = self.ledger.fail_debit(tx.id).await?;
                    warn!(tx_id = %tx.id, detail, "Invalid destination account, debit refunded");
                    return Ok(ExecuteOutcome::Failed {
                        tx,
                        reason: format!("invalid account: {}", detail),
                    });
                }
                Err(e) => {
                    // Timeout, outage or garbled response: the payout may
                    // have happened. Park the row; never refund blind.
                    self.ledger.mark_unsettled(tx.id).await?;
                    let tx = self.fetch(tx.id).await?;
                    error!(tx_id = %tx.id, error = %e, "Disbursement outcome unknown, marked unsettled");
                    return Ok(ExecuteOutcome::Unsettled(tx));
                }
            }
        }
    }

    /// Map an existing row (duplicate key hit) to its outcome.
    fn outcome_of(&self, tx: Transaction) -> ExecuteOutcome {
        match tx.status {
            TxStatus::Completed => ExecuteOutcome::Completed(tx),
            TxStatus::Failed => ExecuteOutcome::Failed {
                tx,
                reason: "previously declined".to_string(),
            },
            TxStatus::Pending | TxStatus::Unsettled => ExecuteOutcome::Unsettled(tx),
        }
    }

    async fn fetch(&self, id: crate::ledger::TransactionId) -> Result<Transaction, ExecutorError> {
        self.ledger
            .get_transaction(id)
            .await?
            .ok_or_else(|| ExecutorError::Ledger(LedgerError::TransactionNotFound(id.to_string())))
    }

    async fn record_profit(&self, tx: &Transaction) -> Result<(), ExecutorError> {
        match self.profit.record(tx).await {
            Ok(()) => Ok(()),
            // A rerun after a crash may find the record already there
            Err(ProfitError::AlreadyRecorded(_)) => Ok(()),
            Err(e) => Err(ExecutorError::Profit(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::profit::InMemoryProfitLedger;
    use crate::provider::MockProvider;

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        provider: Arc<MockProvider>,
        profit: Arc<InMemoryProfitLedger>,
        executor: TransferExecutor,
        user_id: UserId,
    }

    async fn fixture(balance_naira: i64) -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let provider = Arc::new(MockProvider::new());
        let profit = Arc::new(InMemoryProfitLedger::new());
        let user = ledger.create_user("chat-1", "9900000001").await.unwrap();
        ledger
            .apply_credit(
                user.id,
                Amount::from_naira(balance_naira).unwrap(),
                "seed-credit",
            )
            .await
            .unwrap();
        let executor = TransferExecutor::new(
            ledger.clone(),
            provider.clone(),
            profit.clone(),
            FeePolicy::default(),
            ExecutorConfig {
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
            },
        );
        Fixture {
            ledger,
            provider,
            profit,
            executor,
            user_id: user.id,
        }
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_records_profit() {
        let f = fixture(10_000).await;
        let outcome = f
            .executor
            .execute(f.user_id, Amount::from_naira(5000).unwrap(), "0123456789", "058", "key-1")
            .await
            .unwrap();

        let tx = match outcome {
            ExecuteOutcome::Completed(tx) => tx,
            other => panic!("expected completed, got {:?}", other),
        };
        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(tx.provider_ref.as_deref(), Some("key-1"));

        let user = f.ledger.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000 - 5030).unwrap());

        let summary = f.profit.summarize(None, None).await.unwrap();
        assert_eq!(summary.total_profit, Amount::from_naira(10).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_key_does_not_pay_twice() {
        let f = fixture(10_000).await;
        let amount = Amount::from_naira(2000).unwrap();
        f.executor
            .execute(f.user_id, amount, "0123456789", "058", "key-dup")
            .await
            .unwrap();
        let second = f
            .executor
            .execute(f.user_id, amount, "0123456789", "058", "key-dup")
            .await
            .unwrap();

        assert!(matches!(second, ExecuteOutcome::Completed(_)));
        assert_eq!(f.provider.disburse_count(), 1);
        let user = f.ledger.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000 - 2030).unwrap());
    }

    #[tokio::test]
    async fn test_decline_refunds() {
        let f = fixture(10_000).await;
        f.provider
            .script_disburse(Ok(DisburseStatus::Declined("limit exceeded".into())));

        let outcome = f
            .executor
            .execute(f.user_id, Amount::from_naira(5000).unwrap(), "0123456789", "058", "key-2")
            .await
            .unwrap();

        match outcome {
            ExecuteOutcome::Failed { tx, reason } => {
                assert_eq!(tx.status, TxStatus::Failed);
                assert_eq!(reason, "limit exceeded");
            }
            other => panic!("expected failed, got {:?}", other),
        }
        let user = f.ledger.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000).unwrap());
        // No profit on a failed transfer
        let summary = f.profit.summarize(None, None).await.unwrap();
        assert_eq!(summary.count, 0);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let f = fixture(10_000).await;
        f.provider.script_disburse(Err(ProviderError::Timeout));
        f.provider.script_disburse(Ok(DisburseStatus::Success));

        let outcome = f
            .executor
            .execute(f.user_id, Amount::from_naira(1000).unwrap(), "0123456789", "058", "key-3")
            .await
            .unwrap();

        assert!(matches!(outcome, ExecuteOutcome::Completed(_)));
        assert_eq!(f.provider.disburse_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_parks_unsettled() {
        let f = fixture(10_000).await;
        for _ in 0..3 {
            f.provider.script_disburse(Err(ProviderError::Timeout));
        }

        let outcome = f
            .executor
            .execute(f.user_id, Amount::from_naira(1000).unwrap(), "0123456789", "058", "key-4")
            .await
            .unwrap();

        match outcome {
            ExecuteOutcome::Unsettled(tx) => assert_eq!(tx.status, TxStatus::Unsettled),
            other => panic!("expected unsettled, got {:?}", other),
        }
        // Debit stays applied until the true outcome is known
        let user = f.ledger.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000 - 1030).unwrap());
    }

    #[tokio::test]
    async fn test_invalid_account_refunds() {
        let f = fixture(10_000).await;
        f.provider
            .script_disburse(Err(ProviderError::InvalidAccount("0123456789 @ 058".into())));

        let outcome = f
            .executor
            .execute(f.user_id, Amount::from_naira(1000).unwrap(), "0123456789", "058", "key-5")
            .await
            .unwrap();

        assert!(matches!(outcome, ExecuteOutcome::Failed { .. }));
        let user = f.ledger.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000).unwrap());
    }

    #[tokio::test]
    async fn test_insufficient_funds_rejected_before_provider() {
        let f = fixture(100).await;
        let err = f
            .executor
            .execute(f.user_id, Amount::from_naira(5000).unwrap(), "0123456789", "058", "key-6")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Ledger(LedgerError::InsufficientFunds)));
        assert_eq!(f.provider.disburse_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_pending_parks_unsettled() {
        let f = fixture(10_000).await;
        f.provider.script_disburse(Ok(DisburseStatus::Pending));

        let outcome = f
            .executor
            .execute(f.user_id, Amount::from_naira(1000).unwrap(), "0123456789", "058", "key-7")
            .await
            .unwrap();
        assert!(matches!(outcome, ExecuteOutcome::Unsettled(_)));
    }
}
