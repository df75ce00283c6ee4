//! Authorization Gate: PIN verification with lockout.
//!
//! PINs are stored only as salted argon2 hashes. Three consecutive
//! wrong attempts lock the account for fifteen minutes; while locked,
//! even the correct PIN is refused. The counter resets only on a
//! successful verification. PIN input is never logged.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::{LedgerError, LedgerStore, UserId};

pub const MAX_PIN_ATTEMPTS: i32 = 3;
pub const LOCKOUT_MINUTES: i64 = 15;

#[derive(Debug, Error)]
pub enum PinError {
    #[error("User not found")]
    UserNotFound,

    #[error("PIN must be exactly 4 digits")]
    InvalidFormat,

    #[error("Hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Outcome of a PIN check. Failures carry what the user needs to know:
/// remaining attempts, or when the lock lifts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinVerification {
    Ok,
    WrongPin { remaining: i32 },
    LockedOut { until: DateTime<Utc> },
    NoPinSet,
}

pub struct PinGate {
    ledger: Arc<dyn LedgerStore>,
}

impl PinGate {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Hash and store a new PIN. Also clears any lockout.
    pub async fn set_pin(&self, user_id: UserId, pin: &str) -> Result<(), PinError> {
        validate_format(pin)?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| PinError::Hashing(e.to_string()))?
            .to_string();
        self.ledger.set_pin_hash(user_id, &hash).await?;
        info!(user_id, "PIN set");
        Ok(())
    }

    /// Verify a PIN attempt, tracking failures and lockout.
    pub async fn verify(&self, user_id: UserId, pin: &str) -> Result<PinVerification, PinError> {
        let user = self
            .ledger
            .get_user(user_id)
            .await?
            .ok_or(PinError::UserNotFound)?;

        let now = Utc::now();
        if let Some(until) = user.pin_locked_until {
            if now < until {
                // Locked means locked, correct PIN or not
                return Ok(PinVerification::LockedOut { until });
            }
        }

        let Some(ref stored) = user.pin_hash else {
            return Ok(PinVerification::NoPinSet);
        };

        if validate_format(pin).is_err() {
            // Malformed input counts as a wrong attempt
            return self.record_failure(user_id, user.pin_failed_attempts).await;
        }

        let parsed =
            PasswordHash::new(stored).map_err(|e| PinError::Hashing(e.to_string()))?;
        match Argon2::default().verify_password(pin.as_bytes(), &parsed) {
            Ok(()) => {
                self.ledger.clear_pin_failures(user_id).await?;
                Ok(PinVerification::Ok)
            }
            Err(_) => self.record_failure(user_id, user.pin_failed_attempts).await,
        }
    }

    async fn record_failure(
        &self,
        user_id: UserId,
        previous_attempts: i32,
    ) -> Result<PinVerification, PinError> {
        let attempts = previous_attempts + 1;
        if attempts >= MAX_PIN_ATTEMPTS {
            let until = Utc::now() + Duration::minutes(LOCKOUT_MINUTES);
            self.ledger
                .record_pin_failure(user_id, attempts, Some(until))
                .await?;
            warn!(user_id, attempts, "PIN lockout triggered");
            Ok(PinVerification::LockedOut { until })
        } else {
            self.ledger
                .record_pin_failure(user_id, attempts, None)
                .await?;
            warn!(user_id, attempts, "Wrong PIN attempt");
            Ok(PinVerification::WrongPin {
                remaining: MAX_PIN_ATTEMPTS - attempts,
            })
        }
    }
}

fn validate_format(pin: &str) -> Result<(), PinError> {
    if pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PinError::InvalidFormat)
    }
}
