//! Beneficiary Directory: per-user nickname → account mapping.
//!
//! Lookups are case-insensitive. A beneficiary is only ever saved after
//! an explicit user confirmation; nothing in this module saves
//! automatically.

pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::ledger::UserId;

#[derive(Debug, Error)]
pub enum BeneficiaryError {
    #[error("Nickname already saved: {0}")]
    NicknameTaken(String),

    #[error("Beneficiary not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for BeneficiaryError {
    fn from(e: sqlx::Error) -> Self {
        BeneficiaryError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Beneficiary {
    pub user_id: UserId,
    pub nickname: String,
    pub account_number: String,
    pub bank_code: String,
    /// Name returned by provider account verification at save time
    pub account_name: String,
}

#[async_trait]
pub trait BeneficiaryStore: Send + Sync {
    /// Case-insensitive nickname lookup.
    async fn find(
        &self,
        user_id: UserId,
        nickname: &str,
    ) -> Result<Option<Beneficiary>, BeneficiaryError>;

    async fn list(&self, user_id: UserId) -> Result<Vec<Beneficiary>, BeneficiaryError>;

    /// Save a new beneficiary. `NicknameTaken` if the (user, nickname)
    /// pair already exists, case-insensitively.
    async fn save(&self, beneficiary: Beneficiary) -> Result<(), BeneficiaryError>;

    async fn remove(&self, user_id: UserId, nickname: &str) -> Result<(), BeneficiaryError>;
}

/// In-memory directory for tests and local development.
#[derive(Default)]
pub struct InMemoryBeneficiaries {
    // key: (user_id, lowercased nickname)
    inner: Mutex<HashMap<(UserId, String), Beneficiary>>,
}

impl InMemoryBeneficiaries {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BeneficiaryStore for InMemoryBeneficiaries {
    async fn find(
        &self,
        user_id: UserId,
        nickname: &str,
    ) -> Result<Option<Beneficiary>, BeneficiaryError> {
        let key = (user_id, nickname.trim().to_lowercase());
        Ok(self.inner.lock().unwrap().get(&key).cloned())
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Beneficiary>, BeneficiaryError> {
        let mut out: Vec<Beneficiary> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        Ok(out)
    }

    async fn save(&self, beneficiary: Beneficiary) -> Result<(), BeneficiaryError> {
        let key = (
            beneficiary.user_id,
            beneficiary.nickname.trim().to_lowercase(),
        );
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&key) {
            return Err(BeneficiaryError::NicknameTaken(beneficiary.nickname));
        }
        inner.insert(key, beneficiary);
        Ok(())
    }

    async fn remove(&self, user_id: UserId, nickname: &str) -> Result<(), BeneficiaryError> {
        let key = (user_id, nickname.trim().to_lowercase());
        match self.inner.lock().unwrap().remove(&key) {
            Some(_) => Ok(()),
            None => Err(BeneficiaryError::NotFound(nickname.to_string())),
        }
    }
}
