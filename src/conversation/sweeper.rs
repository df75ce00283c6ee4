//! Expiry sweeper.
//!
//! Conversations also expire lazily when the user's next message
//! arrives; this task handles the users who never come back, so their
//! pending rows do not sit in storage forever and they hear that the
//! transfer was dropped.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::notifier::Notifier;

use super::store::PendingStateStore;

pub struct ExpirySweeper {
    pending: Arc<dyn PendingStateStore>,
    notifier: Arc<dyn Notifier>,
    scan_interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        pending: Arc<dyn PendingStateStore>,
        notifier: Arc<dyn Notifier>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            pending,
            notifier,
            scan_interval,
        }
    }

    pub async fn run(self) {
        info!(
            interval_secs = self.scan_interval.as_secs(),
            "Expiry sweeper started"
        );
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Expiry sweep failed");
            }
        }
    }

    /// Purge expired conversations, telling each owner.
    pub async fn run_once(&self) -> Result<usize, super::store::PendingStoreError> {
        let purged = self.pending.purge_expired().await?;
        for p in &purged {
            info!(user_id = p.user_id, state = %p.state, "Pending transfer expired");
            // EXECUTING rows are owned by the ledger now; the settlement
            // worker reports their outcome, not us
            if p.state == super::state::ConversationState::Executing {
                continue;
            }
            let message =
                "Your transfer request expired because I didn't hear back, so I dropped it. \
                 Nothing was sent. Start again whenever you're ready.";
            if let Err(e) = self.notifier.send_alert(p.user_id, message).await {
                warn!(user_id = p.user_id, error = %e, "Expiry alert delivery failed");
            }
        }
        Ok(purged.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::state::ConversationState;
    use crate::conversation::store::{InMemoryPendingStore, PendingTransfer, TransferSlots};
    use crate::notifier::RecordingNotifier;
    use chrono::Utc;

    #[tokio::test]
    async fn test_sweep_notifies_owner() {
        let pending = Arc::new(InMemoryPendingStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let sweeper = ExpirySweeper::new(pending.clone(), notifier.clone(), Duration::from_secs(60));

        let mut stale =
            PendingTransfer::new(7, ConversationState::AwaitingPin, TransferSlots::default());
        stale.expires_at = Utc::now() - chrono::Duration::minutes(1);
        pending.upsert(&stale).await.unwrap();

        let purged = sweeper.run_once().await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(notifier.alerts().len(), 1);
        assert_eq!(notifier.alerts()[0].0, 7);
        assert!(pending.get(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_executing_rows_purged_silently() {
        let pending = Arc::new(InMemoryPendingStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let sweeper = ExpirySweeper::new(pending.clone(), notifier.clone(), Duration::from_secs(60));

        let mut stale =
            PendingTransfer::new(8, ConversationState::Executing, TransferSlots::default());
        stale.expires_at = Utc::now() - chrono::Duration::minutes(1);
        pending.upsert(&stale).await.unwrap();

        sweeper.run_once().await.unwrap();
        assert!(notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_rows_untouched() {
        let pending = Arc::new(InMemoryPendingStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let sweeper = ExpirySweeper::new(pending.clone(), notifier.clone(), Duration::from_secs(60));

        let fresh =
            PendingTransfer::new(9, ConversationState::AwaitingAmount, TransferSlots::default());
        pending.upsert(&fresh).await.unwrap();

        assert_eq!(sweeper.run_once().await.unwrap(), 0);
        assert!(pending.get(9).await.unwrap().is_some());
    }
}
