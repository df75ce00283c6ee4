//! Deposit reconciliation.
//!
//! Inbound money arrives as provider webhooks. The gateway verifies the
//! HMAC-SHA512 signature over the raw body before parsing anything;
//! the reconciler then applies the credit idempotently under the user's
//! lock and tells the user.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::{CreditOutcome, LedgerError, LedgerStore, Transaction};
use crate::locks::UserLocks;
use crate::money::Amount;
use crate::notifier::Notifier;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Verify a webhook signature: hex HMAC-SHA512 of the raw body.
///
/// Comparison is constant-time via the MAC's own verifier. Any parse
/// failure of the supplied signature is a plain mismatch.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = HmacSha512::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the hex signature for a body. Test and client-side helper.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Result of processing one deposit event.
#[derive(Debug)]
pub enum DepositOutcome {
    Credited(Transaction),
    /// Same provider reference seen before; balance untouched
    Duplicate(Transaction),
    /// No user owns the destination account; logged for manual review
    UnknownAccount,
}

pub struct CreditReconciler {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<UserLocks>,
}

impl CreditReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            ledger,
            notifier,
            locks,
        }
    }

    /// Apply one deposit event. Idempotent on `reference`.
    pub async fn apply_deposit(
        &self,
        reference: &str,
        account_number: &str,
        amount: Amount,
    ) -> Result<DepositOutcome, ReconcileError> {
        let Some(user) = self.ledger.find_user_by_account(account_number).await? else {
            warn!(reference, account_number, "Deposit for unknown account");
            return Ok(DepositOutcome::UnknownAccount);
        };

        let _guard = self.locks.acquire(user.id).await;
        match self.ledger.apply_credit(user.id, amount, reference).await? {
            CreditOutcome::Applied(tx) => {
                info!(
                    user_id = user.id,
                    reference,
                    amount = amount.kobo(),
                    "Deposit credited"
                );
                if let Err(e) = self.notifier.send_receipt(user.id, &tx).await {
                    warn!(user_id = user.id, error = %e, "Deposit receipt delivery failed");
                }
                Ok(DepositOutcome::Credited(tx))
            }
            CreditOutcome::Duplicate(tx) => {
                info!(user_id = user.id, reference, "Duplicate deposit webhook ignored");
                Ok(DepositOutcome::Duplicate(tx))
            }
        }
    }
}
