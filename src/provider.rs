//! Disbursement provider port.
//!
//! The provider is the external bank rail: account-name verification,
//! disbursement, and status polling. Disbursements carry the caller's
//! idempotency key as the provider-side reference so provider retries
//! dedup too.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::money::Amount;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// No response within the deadline; the outcome is UNKNOWN.
    /// Callers must never treat this as a decline.
    #[error("Provider timed out")]
    Timeout,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Account verification failed: {0}")]
    InvalidAccount(String),

    #[error("Provider protocol error: {0}")]
    Protocol(String),
}

impl ProviderError {
    /// Whether a retry with the same reference can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Unavailable(_))
    }
}

/// Terminal-or-pending outcome of a disbursement as the provider sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisburseStatus {
    /// Funds delivered
    Success,
    /// Explicit decline with a provider reason; safe to reverse
    Declined(String),
    /// Accepted but not final yet
    Pending,
}

#[derive(Debug, Clone)]
pub struct DisburseReceipt {
    pub status: DisburseStatus,
    pub provider_ref: String,
}

#[async_trait]
pub trait DisbursementProvider: Send + Sync {
    /// Resolve the account holder's name, or fail with `InvalidAccount`.
    async fn verify_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<String, ProviderError>;

    /// Send money. `reference` doubles as the provider-side idempotency
    /// key: re-sending with the same reference must not pay out twice.
    async fn disburse(
        &self,
        amount: Amount,
        account_number: &str,
        bank_code: &str,
        reference: &str,
    ) -> Result<DisburseReceipt, ProviderError>;

    /// Poll the outcome of a previous disbursement by reference.
    async fn get_status(&self, reference: &str) -> Result<DisburseStatus, ProviderError>;
}

/// HTTP implementation against the provider's REST API.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct VerifyResponse {
    account_name: String,
}

#[derive(Deserialize)]
struct DisburseResponse {
    status: String,
    reference: String,
    #[serde(default)]
    reason: Option<String>,
}

impl HttpProvider {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn map_err(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }

    fn parse_status(status: &str, reason: Option<String>) -> DisburseStatus {
        match status {
            "success" => DisburseStatus::Success,
            "failed" | "declined" => {
                DisburseStatus::Declined(reason.unwrap_or_else(|| "declined".to_string()))
            }
            _ => DisburseStatus::Pending,
        }
    }
}

#[async_trait]
impl DisbursementProvider for HttpProvider {
    async fn verify_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1/accounts/verify", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("account_number", account_number), ("bank_code", bank_code)])
            .send()
            .await
            .map_err(Self::map_err)?;

        if resp.status().as_u16() == 422 || resp.status().as_u16() == 404 {
            return Err(ProviderError::InvalidAccount(format!(
                "{} @ {}",
                account_number, bank_code
            )));
        }
        if resp.status().is_server_error() {
            return Err(ProviderError::Unavailable(resp.status().to_string()));
        }
        let body: VerifyResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;
        Ok(body.account_name)
    }

    async fn disburse(
        &self,
        amount: Amount,
        account_number: &str,
        bank_code: &str,
        reference: &str,
    ) -> Result<DisburseReceipt, ProviderError> {
        let url = format!("{}/v1/disbursements", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "amount_kobo": amount.kobo(),
                "account_number": account_number,
                "bank_code": bank_code,
                "reference": reference,
            }))
            .send()
            .await
            .map_err(Self::map_err)?;

        if resp.status().is_server_error() {
            return Err(ProviderError::Unavailable(resp.status().to_string()));
        }
        let body: DisburseResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;
        Ok(DisburseReceipt {
            status: Self::parse_status(&body.status, body.reason),
            provider_ref: body.reference,
        })
    }

    async fn get_status(&self, reference: &str) -> Result<DisburseStatus, ProviderError> {
        let url = format!("{}/v1/disbursements/{}", self.base_url, reference);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::map_err)?;

        if resp.status().is_server_error() {
            return Err(ProviderError::Unavailable(resp.status().to_string()));
        }
        let body: DisburseResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;
        Ok(Self::parse_status(&body.status, body.reason))
    }
}

/// Scripted provider for tests.
///
/// Each call pops the next scripted result; an empty script means
/// success. Operation counters let tests assert exactly-once behavior.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type DisburseScript = VecDeque<Result<DisburseStatus, ProviderError>>;

    #[derive(Default)]
    pub struct MockProvider {
        disburse_script: Mutex<DisburseScript>,
        status_by_ref: Mutex<HashMap<String, DisburseStatus>>,
        known_accounts: Mutex<HashMap<(String, String), String>>,
        pub_disburse_count: AtomicUsize,
        pub_status_count: AtomicUsize,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register an account so `verify_account` resolves it.
        pub fn add_account(&self, account_number: &str, bank_code: &str, name: &str) {
            self.known_accounts.lock().unwrap().insert(
                (account_number.to_string(), bank_code.to_string()),
                name.to_string(),
            );
        }

        /// Queue the result of the next `disburse` call.
        pub fn script_disburse(&self, result: Result<DisburseStatus, ProviderError>) {
            self.disburse_script.lock().unwrap().push_back(result);
        }

        /// Set what `get_status` reports for a reference.
        pub fn set_status(&self, reference: &str, status: DisburseStatus) {
            self.status_by_ref
                .lock()
                .unwrap()
                .insert(reference.to_string(), status);
        }

        pub fn disburse_count(&self) -> usize {
            self.pub_disburse_count.load(Ordering::SeqCst)
        }

        pub fn status_count(&self) -> usize {
            self.pub_status_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DisbursementProvider for MockProvider {
        async fn verify_account(
            &self,
            account_number: &str,
            bank_code: &str,
        ) -> Result<String, ProviderError> {
            self.known_accounts
                .lock()
                .unwrap()
                .get(&(account_number.to_string(), bank_code.to_string()))
                .cloned()
                .ok_or_else(|| {
                    ProviderError::InvalidAccount(format!("{} @ {}", account_number, bank_code))
                })
        }

        async fn disburse(
            &self,
            _amount: Amount,
            _account_number: &str,
            _bank_code: &str,
            reference: &str,
        ) -> Result<DisburseReceipt, ProviderError> {
            self.pub_disburse_count.fetch_add(1, Ordering::SeqCst);
            let next = self.disburse_script.lock().unwrap().pop_front();
            let status = match next {
                Some(Ok(status)) => status,
                Some(Err(e)) => return Err(e),
                None => DisburseStatus::Success,
            };
            self.status_by_ref
                .lock()
                .unwrap()
                .insert(reference.to_string(), status.clone());
            Ok(DisburseReceipt {
                status,
                provider_ref: reference.to_string(),
            })
        }

        async fn get_status(&self, reference: &str) -> Result<DisburseStatus, ProviderError> {
            self.pub_status_count.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .status_by_ref
                .lock()
                .unwrap()
                .get(reference)
                .cloned()
                .unwrap_or(DisburseStatus::Pending))
        }
    }
}

pub use mock::MockProvider;
