//! In-memory Ledger Store.
//!
//! Backs tests and local development. A single mutex guards the whole
//! ledger; per-user serialization for the orchestration paths is handled
//! one level up by the user lock map, so contention here is irrelevant.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::store::{CreditOutcome, DebitOutcome, LedgerError, LedgerStore};
use super::types::{Transaction, TransactionId, TxKind, TxStatus, UserId, UserRecord};
use crate::money::Amount;

#[derive(Default)]
struct Inner {
    next_user_id: UserId,
    users: HashMap<UserId, UserRecord>,
    transactions: Vec<Transaction>,
    by_id: HashMap<TransactionId, usize>,
    by_idem: HashMap<String, usize>,
    by_provider_ref: HashMap<String, usize>,
}

pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_user_id: 1,
                ..Default::default()
            }),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn user_mut(&mut self, user_id: UserId) -> Result<&mut UserRecord, LedgerError> {
        self.users.get_mut(&user_id).ok_or(LedgerError::UserNotFound)
    }

    fn insert_tx(&mut self, tx: Transaction) -> usize {
        let idx = self.transactions.len();
        self.by_id.insert(tx.id, idx);
        self.by_idem.insert(tx.idempotency_key.clone(), idx);
        if let Some(ref r) = tx.provider_ref {
            self.by_provider_ref.insert(r.clone(), idx);
        }
        self.transactions.push(tx);
        idx
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_user(
        &self,
        chat_id: &str,
        account_number: &str,
    ) -> Result<UserRecord, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .users
            .values()
            .any(|u| u.account_number == account_number)
        {
            return Err(LedgerError::Storage(format!(
                "account number already assigned: {}",
                account_number
            )));
        }
        let id = inner.next_user_id;
        inner.next_user_id += 1;
        let user = UserRecord {
            id,
            chat_id: chat_id.to_string(),
            account_number: account_number.to_string(),
            balance: Amount::ZERO,
            pin_hash: None,
            pin_failed_attempts: 0,
            pin_locked_until: None,
            frozen: false,
        };
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>, LedgerError> {
        Ok(self.inner.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn find_user_by_chat(&self, chat_id: &str) -> Result<Option<UserRecord>, LedgerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.chat_id == chat_id)
            .cloned())
    }

    async fn find_user_by_account(
        &self,
        account_number: &str,
    ) -> Result<Option<UserRecord>, LedgerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.account_number == account_number)
            .cloned())
    }

    async fn set_pin_hash(&self, user_id: UserId, pin_hash: &str) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner.user_mut(user_id)?;
        user.pin_hash = Some(pin_hash.to_string());
        user.pin_failed_attempts = 0;
        user.pin_locked_until = None;
        Ok(())
    }

    async fn record_pin_failure(
        &self,
        user_id: UserId,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner.user_mut(user_id)?;
        user.pin_failed_attempts = failed_attempts;
        user.pin_locked_until = locked_until;
        Ok(())
    }

    async fn clear_pin_failures(&self, user_id: UserId) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner.user_mut(user_id)?;
        user.pin_failed_attempts = 0;
        user.pin_locked_until = None;
        Ok(())
    }

    async fn begin_debit(
        &self,
        user_id: UserId,
        kind: TxKind,
        amount: Amount,
        fee: Amount,
        profit: Amount,
        idempotency_key: &str,
    ) -> Result<DebitOutcome, LedgerError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&idx) = inner.by_idem.get(idempotency_key) {
            return Ok(DebitOutcome::Duplicate(inner.transactions[idx].clone()));
        }

        let user = inner.user_mut(user_id)?;
        if user.frozen {
            return Err(LedgerError::AccountFrozen);
        }
        let total = amount.checked_add(fee).map_err(|_| {
            LedgerError::Storage("amount + fee overflow".to_string())
        })?;
        if user.balance < total {
            return Err(LedgerError::InsufficientFunds);
        }
        user.balance = user
            .balance
            .checked_sub(total)
            .map_err(|_| LedgerError::InsufficientFunds)?;

        let tx = Transaction {
            id: TransactionId::new(),
            user_id,
            kind,
            amount,
            fee,
            profit,
            idempotency_key: idempotency_key.to_string(),
            provider_ref: None,
            status: TxStatus::Pending,
            created_at: Utc::now(),
            settled_at: None,
        };
        let idx = inner.insert_tx(tx);
        Ok(DebitOutcome::Created(inner.transactions[idx].clone()))
    }

    async fn complete_debit(
        &self,
        id: TransactionId,
        provider_ref: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = *inner
            .by_id
            .get(&id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        if let Some(r) = provider_ref {
            if inner.by_provider_ref.get(r).is_some_and(|&i| i != idx) {
                return Err(LedgerError::Integrity(format!(
                    "provider reference already applied: {}",
                    r
                )));
            }
            inner.by_provider_ref.insert(r.to_string(), idx);
        }
        let tx = &mut inner.transactions[idx];
        if tx.status.is_terminal() {
            if tx.status == TxStatus::Completed {
                return Ok(tx.clone());
            }
            return Err(LedgerError::AlreadyTerminal(id.to_string()));
        }
        tx.status = TxStatus::Completed;
        tx.provider_ref = provider_ref.map(str::to_string).or(tx.provider_ref.take());
        tx.settled_at = Some(Utc::now());
        Ok(tx.clone())
    }

    async fn fail_debit(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = *inner
            .by_id
            .get(&id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        let (user_id, refund, status) = {
            let tx = &inner.transactions[idx];
            (
                tx.user_id,
                tx.amount.checked_add(tx.fee).expect("checked at debit"),
                tx.status,
            )
        };
        if status.is_terminal() {
            if status == TxStatus::Failed {
                return Ok(inner.transactions[idx].clone());
            }
            return Err(LedgerError::AlreadyTerminal(id.to_string()));
        }
        let user = inner.user_mut(user_id)?;
        user.balance = user
            .balance
            .checked_add(refund)
            .map_err(|_| LedgerError::Storage("refund overflow".to_string()))?;
        let tx = &mut inner.transactions[idx];
        tx.status = TxStatus::Failed;
        tx.settled_at = Some(Utc::now());
        Ok(tx.clone())
    }

    async fn mark_unsettled(&self, id: TransactionId) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = *inner
            .by_id
            .get(&id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        let tx = &mut inner.transactions[idx];
        if tx.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal(id.to_string()));
        }
        tx.status = TxStatus::Unsettled;
        Ok(())
    }

    async fn list_unsettled(
        &self,
        older_than: Duration,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let cutoff = Utc::now() - older_than;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.status == TxStatus::Unsettled && t.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn apply_credit(
        &self,
        user_id: UserId,
        amount: Amount,
        provider_ref: &str,
    ) -> Result<CreditOutcome, LedgerError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&idx) = inner.by_provider_ref.get(provider_ref) {
            return Ok(CreditOutcome::Duplicate(inner.transactions[idx].clone()));
        }

        let user = inner.user_mut(user_id)?;
        if user.frozen {
            return Err(LedgerError::AccountFrozen);
        }
        user.balance = user
            .balance
            .checked_add(amount)
            .map_err(|_| LedgerError::Storage("credit overflow".to_string()))?;

        let now = Utc::now();
        let tx = Transaction {
            id: TransactionId::new(),
            user_id,
            kind: TxKind::Credit,
            amount,
            fee: Amount::ZERO,
            profit: Amount::ZERO,
            idempotency_key: format!("credit:{}", provider_ref),
            provider_ref: Some(provider_ref.to_string()),
            status: TxStatus::Completed,
            created_at: now,
            settled_at: Some(now),
        };
        let idx = inner.insert_tx(tx);
        Ok(CreditOutcome::Applied(inner.transactions[idx].clone()))
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.by_id.get(&id).map(|&i| inner.transactions[i].clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.by_idem.get(key).map(|&i| inner.transactions[i].clone()))
    }

    async fn audit_balance(&self, user_id: UserId) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let expected: i64 = inner
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(Transaction::signed_amount)
            .sum();
        let user = inner.user_mut(user_id)?;
        if user.balance.kobo() != expected {
            let actual = user.balance.kobo();
            user.frozen = true;
            return Err(LedgerError::Integrity(format!(
                "user {} balance {} != ledger sum {}",
                user_id, actual, expected
            )));
        }
        Ok(())
    }
}
