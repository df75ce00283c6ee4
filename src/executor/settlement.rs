//! Settlement worker.
//!
//! Periodically sweeps UNSETTLED transactions and asks the provider for
//! the true outcome. Success confirms the debit; an explicit decline
//! refunds it. Anything still pending at the provider is left alone for
//! the next pass. This is the only code allowed to move a row out of
//! UNSETTLED.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::ledger::{LedgerStore, Transaction};
use crate::notifier::Notifier;
use crate::profit::{ProfitError, ProfitStore};
use crate::provider::{DisburseStatus, DisbursementProvider};

/// Counters from one sweep, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SettlementStats {
    pub scanned: usize,
    pub confirmed: usize,
    pub reversed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

pub struct SettlementWorker {
    ledger: Arc<dyn LedgerStore>,
    provider: Arc<dyn DisbursementProvider>,
    profit: Arc<dyn ProfitStore>,
    notifier: Arc<dyn Notifier>,
    scan_interval: Duration,
    /// Only rows older than this are polled, so the executor's own
    /// in-flight work is not raced.
    stale_threshold: chrono::Duration,
}

impl SettlementWorker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        provider: Arc<dyn DisbursementProvider>,
        profit: Arc<dyn ProfitStore>,
        notifier: Arc<dyn Notifier>,
        scan_interval: Duration,
        stale_threshold: chrono::Duration,
    ) -> Self {
        Self {
            ledger,
            provider,
            profit,
            notifier,
            scan_interval,
            stale_threshold,
        }
    }

    /// Run forever. Spawn this on its own task.
    pub async fn run(self) {
        info!(
            interval_secs = self.scan_interval.as_secs(),
            "Settlement worker started"
        );
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(stats) if stats.scanned > 0 => {
                    info!(
                        scanned = stats.scanned,
                        confirmed = stats.confirmed,
                        reversed = stats.reversed,
                        still_pending = stats.still_pending,
                        errors = stats.errors,
                        "Settlement sweep done"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Settlement sweep failed"),
            }
        }
    }

    /// One sweep over currently unsettled rows.
    pub async fn run_once(&self) -> Result<SettlementStats, crate::ledger::LedgerError> {
        let unsettled = self.ledger.list_unsettled(self.stale_threshold).await?;
        let mut stats = SettlementStats {
            scanned: unsettled.len(),
            ..Default::default()
        };

        for tx in unsettled {
            match self.provider.get_status(&tx.idempotency_key).await {
                Ok(DisburseStatus::Success) => match self.confirm(&tx).await {
                    Ok(()) => stats.confirmed += 1,
                    Err(e) => {
                        error!(tx_id = %tx.id, error = %e, "Failed to confirm settled transfer");
                        stats.errors += 1;
                    }
                },
                Ok(DisburseStatus::Declined(reason)) => match self.reverse(&tx, &reason).await {
                    Ok(()) => stats.reversed += 1,
                    Err(e) => {
                        error!(tx_id = %tx.id, error = %e, "Failed to reverse declined transfer");
                        stats.errors += 1;
                    }
                },
                Ok(DisburseStatus::Pending) => stats.still_pending += 1,
                Err(e) => {
                    // Leave the row; a later sweep will see it again
                    warn!(tx_id = %tx.id, error = %e, "Status poll failed");
                    stats.errors += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn confirm(&self, tx: &Transaction) -> Result<(), crate::ledger::LedgerError> {
        let settled = self
            .ledger
            .complete_debit(tx.id, Some(&tx.idempotency_key))
            .await?;
        match self.profit.record(&settled).await {
            Ok(()) | Err(ProfitError::AlreadyRecorded(_)) => {}
            Err(e) => warn!(tx_id = %settled.id, error = %e, "Profit record failed"),
        }
        info!(tx_id = %settled.id, "Unsettled transfer confirmed");
        if let Err(e) = self.notifier.send_receipt(settled.user_id, &settled).await {
            warn!(tx_id = %settled.id, error = %e, "Receipt delivery failed");
        }
        Ok(())
    }

    async fn reverse(&self, tx: &Transaction, reason: &str) -> Result<(), crate::ledger::LedgerError> {
        let failed = self.ledger.fail_debit(tx.id).await?;
        warn!(tx_id = %failed.id, reason, "Unsettled transfer declined, debit refunded");
        let message = format!(
            "Your transfer of {} could not be completed ({}). The money is back in your balance.",
            failed.amount, reason
        );
        if let Err(e) = self.notifier.send_alert(failed.user_id, &message).await {
            warn!(tx_id = %failed.id, error = %e, "Alert delivery failed");
        }
        Ok(())
    }
}
