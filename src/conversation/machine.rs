//! Conversation engine.
//!
//! Drives the per-user transfer state machine: slot filling, recipient
//! verification, confirmation, PIN, execution. Each turn runs under the
//! user's lock, so a user's messages, deposits and settlement updates
//! never interleave.
//!
//! PIN handling rule: while a conversation is AWAITING_PIN the raw text
//! goes straight to the authorization gate. It is never parsed, never
//! sent to the NLP service, and never logged.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth_gate::{PinError, PinGate, PinVerification};
use crate::beneficiary::{Beneficiary, BeneficiaryError, BeneficiaryStore};
use crate::executor::{ExecuteOutcome, ExecutorError, TransferExecutor};
use crate::fees::FeePolicy;
use crate::intent::{
    bank_name, parser, BeneficiaryAction, Intent, IntentResolver, RecipientRef, Resolved,
};
use crate::ledger::{LedgerError, LedgerStore, Transaction, TxKind, UserId, UserRecord};
use crate::locks::UserLocks;
use crate::money::Amount;
use crate::provider::{DisbursementProvider, ProviderError};

use super::state::ConversationState;
use super::store::{PendingStateStore, PendingStoreError, PendingTransfer, TransferSlots};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Pending(#[from] PendingStoreError),

    #[error("Beneficiary store error: {0}")]
    Beneficiary(String),

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl From<BeneficiaryError> for EngineError {
    fn from(e: BeneficiaryError) -> Self {
        EngineError::Beneficiary(e.to_string())
    }
}

pub struct ConversationEngine {
    ledger: Arc<dyn LedgerStore>,
    pending: Arc<dyn PendingStateStore>,
    beneficiaries: Arc<dyn BeneficiaryStore>,
    provider: Arc<dyn DisbursementProvider>,
    resolver: Arc<IntentResolver>,
    pin_gate: PinGate,
    executor: Arc<TransferExecutor>,
    locks: Arc<UserLocks>,
    fees: FeePolicy,
}

impl ConversationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        pending: Arc<dyn PendingStateStore>,
        beneficiaries: Arc<dyn BeneficiaryStore>,
        provider: Arc<dyn DisbursementProvider>,
        resolver: Arc<IntentResolver>,
        executor: Arc<TransferExecutor>,
        locks: Arc<UserLocks>,
        fees: FeePolicy,
    ) -> Self {
        let pin_gate = PinGate::new(ledger.clone());
        Self {
            ledger,
            pending,
            beneficiaries,
            provider,
            resolver,
            pin_gate,
            executor,
            locks,
            fees,
        }
    }

    /// Handle one inbound chat message and produce the reply text.
    pub async fn handle_message(&self, chat_id: &str, text: &str) -> Result<String, EngineError> {
        let (user, welcome) = match self.ledger.find_user_by_chat(chat_id).await? {
            Some(user) => (user, None),
            None => {
                let user = self.onboard(chat_id).await?;
                let welcome = format!(
                    "Welcome! I set up an account for you. Your virtual account number is {}; \
                     transfers to it fund your balance. Before sending money, choose a PIN with \
                     \"set pin\" followed by 4 digits.",
                    user.account_number
                );
                (user, Some(welcome))
            }
        };

        let _guard = self.locks.acquire(user.id).await;

        if user.frozen {
            return Ok(
                "Your account is temporarily on hold pending a review. Please contact support."
                    .to_string(),
            );
        }

        // PIN setup works in any state, including AWAITING_PIN with no PIN yet
        let trimmed = text.trim();
        if trimmed.to_lowercase().starts_with("set pin") {
            let pin = trimmed["set pin".len()..].trim();
            return match self.pin_gate.set_pin(user.id, pin).await {
                Ok(()) => Ok("Your PIN is set.".to_string()),
                Err(PinError::InvalidFormat) => {
                    Ok("A PIN is exactly 4 digits, e.g. \"set pin 4821\".".to_string())
                }
                Err(e) => Err(e.into()),
            };
        }

        let mut expired_note = None;
        let mut pending = self.pending.get(user.id).await?;
        if let Some(p) = &pending {
            if p.is_expired(chrono::Utc::now()) {
                self.pending.delete(user.id).await?;
                info!(user_id = user.id, state = %p.state, "Expired pending transfer dropped");
                expired_note =
                    Some("Your earlier transfer request expired, so I dropped it. ".to_string());
                pending = None;
            }
        }

        let reply = match pending {
            None => self.handle_idle(&user, text).await?,
            Some(p) => match p.state {
                ConversationState::AwaitingRecipient => {
                    self.handle_awaiting_recipient(&user, p, text).await?
                }
                ConversationState::AwaitingAmount => {
                    self.handle_awaiting_amount(&user, p, text).await?
                }
                ConversationState::RecipientResolved => {
                    self.handle_confirm(&user, p, text).await?
                }
                ConversationState::AwaitingPin => self.handle_pin(&user, p, text).await?,
                ConversationState::Executing => self.handle_executing(&user, p).await?,
                ConversationState::AwaitingSaveConfirm => {
                    self.handle_save_confirm(&user, p, text).await?
                }
                // Terminal or Idle rows are never stored; treat as idle
                _ => {
                    self.pending.delete(user.id).await?;
                    self.handle_idle(&user, text).await?
                }
            },
        };

        match (welcome, expired_note) {
            (Some(w), _) => Ok(format!("{} {}", w, reply)),
            (None, Some(n)) => Ok(format!("{}{}", n, reply)),
            (None, None) => Ok(reply),
        }
    }

    // === State handlers ===

    async fn handle_idle(&self, user: &UserRecord, text: &str) -> Result<String, EngineError> {
        match self.resolver.resolve(text).await {
            Resolved::Intent(Intent::Transfer { amount, recipient }) => {
                let mut slots = TransferSlots {
                    amount,
                    ..Default::default()
                };
                if let Some(r) = recipient {
                    if let Some(reply) = self.fill_recipient(user, &mut slots, &r).await? {
                        self.pending
                            .upsert(&PendingTransfer::new(
                                user.id,
                                ConversationState::AwaitingRecipient,
                                slots,
                            ))
                            .await?;
                        return Ok(reply);
                    }
                }
                self.advance_with_slots(user, slots).await
            }
            Resolved::Intent(Intent::BalanceInquiry) => self.balance_reply(user.id).await,
            Resolved::Intent(Intent::Beneficiaries(action)) => {
                self.handle_beneficiaries(user, action).await
            }
            Resolved::Intent(
                Intent::ConfirmYes | Intent::ConfirmNo | Intent::Cancel,
            ) => Ok("There's nothing in progress right now.".to_string()),
            Resolved::Intent(Intent::Other(_)) | Resolved::Ambiguous => Ok(self.help_text()),
        }
    }

    async fn handle_awaiting_recipient(
        &self,
        user: &UserRecord,
        pending: PendingTransfer,
        text: &str,
    ) -> Result<String, EngineError> {
        let mut slots = pending.slots.clone();
        match self.resolver.resolve(text).await {
            Resolved::Intent(Intent::Cancel | Intent::ConfirmNo) => self.cancel(user.id).await,
            Resolved::Intent(Intent::BalanceInquiry) => self.balance_reply(user.id).await,
            Resolved::Intent(Intent::Transfer { amount, recipient }) => {
                if slots.amount.is_none() {
                    slots.amount = amount;
                }
                match recipient {
                    Some(r) => {
                        if let Some(reply) = self.fill_recipient(user, &mut slots, &r).await? {
                            self.pending
                                .upsert(&PendingTransfer::new(
                                    user.id,
                                    ConversationState::AwaitingRecipient,
                                    slots,
                                ))
                                .await?;
                            return Ok(reply);
                        }
                        self.advance_with_slots(user, slots).await
                    }
                    None => {
                        self.pending
                            .upsert(&PendingTransfer::new(
                                user.id,
                                ConversationState::AwaitingRecipient,
                                slots,
                            ))
                            .await?;
                        Ok(
                            "Who should receive it? Send a saved nickname, or an account \
                             number and bank (e.g. \"0123456789 GTBank\")."
                                .to_string(),
                        )
                    }
                }
            }
            _ => Ok(
                "I still need the recipient. Send a saved nickname, or an account number \
                 and bank, or \"cancel\"."
                    .to_string(),
            ),
        }
    }

    async fn handle_awaiting_amount(
        &self,
        user: &UserRecord,
        pending: PendingTransfer,
        text: &str,
    ) -> Result<String, EngineError> {
        let mut slots = pending.slots.clone();
        match self.resolver.resolve(text).await {
            Resolved::Intent(Intent::Cancel | Intent::ConfirmNo) => self.cancel(user.id).await,
            Resolved::Intent(Intent::BalanceInquiry) => self.balance_reply(user.id).await,
            Resolved::Intent(Intent::Transfer {
                amount: Some(amount),
                ..
            }) => {
                slots.amount = Some(amount);
                self.advance_with_slots(user, slots).await
            }
            _ => Ok(format!(
                "How much should I send to {}? (e.g. \"5k\" or \"₦2,500\")",
                self.recipient_display(&slots)
            )),
        }
    }

    async fn handle_confirm(
        &self,
        user: &UserRecord,
        pending: PendingTransfer,
        text: &str,
    ) -> Result<String, EngineError> {
        match self.resolver.resolve(text).await {
            Resolved::Intent(Intent::ConfirmYes) => {
                let mut slots = pending.slots.clone();
                slots.reference = Some(ulid::Ulid::new().to_string());
                self.pending
                    .upsert(&PendingTransfer::new(
                        user.id,
                        ConversationState::AwaitingPin,
                        slots,
                    ))
                    .await?;
                Ok("Enter your 4-digit PIN to approve.".to_string())
            }
            Resolved::Intent(Intent::ConfirmNo | Intent::Cancel) => self.cancel(user.id).await,
            _ => {
                let slots = &pending.slots;
                let amount = slots.amount.unwrap_or(Amount::ZERO);
                let quote = self.fees.quote(TxKind::Transfer, amount);
                Ok(format!(
                    "Please reply yes or no: send {} to {}? Fee {}.",
                    amount,
                    self.recipient_display(slots),
                    quote.fee
                ))
            }
        }
    }

    async fn handle_pin(
        &self,
        user: &UserRecord,
        pending: PendingTransfer,
        text: &str,
    ) -> Result<String, EngineError> {
        let attempt = text.trim();
        if parser::is_cancel(attempt) {
            return self.cancel(user.id).await;
        }

        match self.pin_gate.verify(user.id, attempt).await? {
            PinVerification::Ok => self.execute_pending(user, pending).await,
            PinVerification::WrongPin { remaining } => Ok(format!(
                "That PIN is not correct. {} attempt{} left.",
                remaining,
                if remaining == 1 { "" } else { "s" }
            )),
            PinVerification::LockedOut { until } => Ok(format!(
                "Too many wrong attempts. PIN entry is locked until {}.",
                until.format("%H:%M UTC")
            )),
            PinVerification::NoPinSet => Ok(
                "You don't have a PIN yet. Choose one with \"set pin\" followed by 4 digits, \
                 then enter it here."
                    .to_string(),
            ),
        }
    }

    async fn handle_executing(
        &self,
        user: &UserRecord,
        pending: PendingTransfer,
    ) -> Result<String, EngineError> {
        // A message arriving here means a previous turn crashed or is
        // still running. The reference tells us how far money got.
        let Some(reference) = pending.slots.reference.clone() else {
            self.pending.delete(user.id).await?;
            return Ok("Something went wrong with your last transfer; nothing was sent.".to_string());
        };
        match self.ledger.find_by_idempotency_key(&reference).await? {
            Some(tx) if tx.status.is_terminal() => {
                self.pending.delete(user.id).await?;
                Ok(self.terminal_reply(&tx))
            }
            _ => Ok("I'm still completing your last transfer. One moment.".to_string()),
        }
    }

    async fn handle_save_confirm(
        &self,
        user: &UserRecord,
        pending: PendingTransfer,
        text: &str,
    ) -> Result<String, EngineError> {
        if parser::is_no(text) || parser::is_cancel(text) {
            self.pending.delete(user.id).await?;
            return Ok("Okay, I won't save them.".to_string());
        }
        if parser::is_yes(text) {
            return Ok("What nickname should I save them under?".to_string());
        }

        let nickname = text.trim();
        if nickname.is_empty() || nickname.chars().all(|c| c.is_ascii_digit()) {
            return Ok(
                "Send a short name to save them under (e.g. \"mom\"), or \"no\" to skip."
                    .to_string(),
            );
        }

        let slots = &pending.slots;
        let (Some(number), Some(bank_code), Some(name)) = (
            slots.account_number.clone(),
            slots.bank_code.clone(),
            slots.account_name.clone(),
        ) else {
            self.pending.delete(user.id).await?;
            return Ok("I've lost the account details, sorry. Nothing was saved.".to_string());
        };

        let result = self
            .beneficiaries
            .save(Beneficiary {
                user_id: user.id,
                nickname: nickname.to_string(),
                account_number: number,
                bank_code,
                account_name: name.clone(),
            })
            .await;
        self.pending.delete(user.id).await?;
        match result {
            Ok(()) => Ok(format!(
                "Saved. Next time just say \"send 5k to {}\".",
                nickname
            )),
            Err(BeneficiaryError::NicknameTaken(n)) => Ok(format!(
                "You already have \"{}\" saved, so I left things as they were.",
                n
            )),
            Err(e) => Err(e.into()),
        }
    }

    // === Shared steps ===

    /// Move a slot-filling conversation as far forward as it can go.
    async fn advance_with_slots(
        &self,
        user: &UserRecord,
        slots: TransferSlots,
    ) -> Result<String, EngineError> {
        if slots.account_number.is_none() {
            let reply = if slots.amount.is_some() {
                "Who should receive it? Send a saved nickname, or an account number and bank."
            } else {
                "Who should receive the money, and how much?"
            };
            self.pending
                .upsert(&PendingTransfer::new(
                    user.id,
                    ConversationState::AwaitingRecipient,
                    slots,
                ))
                .await?;
            return Ok(reply.to_string());
        }

        let Some(amount) = slots.amount else {
            let display = self.recipient_display(&slots);
            self.pending
                .upsert(&PendingTransfer::new(
                    user.id,
                    ConversationState::AwaitingAmount,
                    slots,
                ))
                .await?;
            return Ok(format!("How much should I send to {}?", display));
        };

        let quote = self.fees.quote(TxKind::Transfer, amount);
        let fresh = self
            .ledger
            .get_user(user.id)
            .await?
            .ok_or(LedgerError::UserNotFound)?;
        if fresh.balance < quote.total() {
            self.pending.delete(user.id).await?;
            return Ok(format!(
                "You don't have enough for that. Balance: {}, needed: {} (including the {} fee). \
                 Top up by transferring to your account number {}.",
                fresh.balance,
                quote.total(),
                quote.fee,
                fresh.account_number
            ));
        }

        if slots.nickname.is_some() {
            // Saved beneficiary: the nickname itself is the confirmation
            let mut slots = slots;
            slots.reference = Some(ulid::Ulid::new().to_string());
            let display = self.recipient_display(&slots);
            self.pending
                .upsert(&PendingTransfer::new(
                    user.id,
                    ConversationState::AwaitingPin,
                    slots,
                ))
                .await?;
            return Ok(format!(
                "Sending {} to {}. Fee {}. Enter your PIN to approve.",
                amount, display, quote.fee
            ));
        }

        let display = self.recipient_display(&slots);
        self.pending
            .upsert(&PendingTransfer::new(
                user.id,
                ConversationState::RecipientResolved,
                slots,
            ))
            .await?;
        Ok(format!(
            "Send {} to {}? Fee {}, total {}. Reply yes to continue or no to cancel.",
            amount,
            display,
            quote.fee,
            quote.total()
        ))
    }

    /// Resolve a recipient reference into the slots. Returns a reply to
    /// send when resolution failed; the caller keeps collecting.
    async fn fill_recipient(
        &self,
        user: &UserRecord,
        slots: &mut TransferSlots,
        recipient: &RecipientRef,
    ) -> Result<Option<String>, EngineError> {
        match recipient {
            RecipientRef::Nickname(nick) => {
                match self.beneficiaries.find(user.id, nick).await? {
                    Some(b) => {
                        slots.account_number = Some(b.account_number);
                        slots.bank_code = Some(b.bank_code);
                        slots.account_name = Some(b.account_name);
                        slots.nickname = Some(b.nickname);
                        slots.save_candidate = false;
                        Ok(None)
                    }
                    None => Ok(Some(format!(
                        "I don't have \"{}\" saved. Send their account number and bank \
                         (e.g. \"0123456789 GTBank\"), or \"cancel\".",
                        nick
                    ))),
                }
            }
            RecipientRef::Account { number, bank_code } => {
                match self.provider.verify_account(number, bank_code).await {
                    Ok(name) => {
                        slots.account_number = Some(number.clone());
                        slots.bank_code = Some(bank_code.clone());
                        slots.account_name = Some(name);
                        slots.nickname = None;
                        slots.save_candidate = true;
                        Ok(None)
                    }
                    Err(ProviderError::InvalidAccount(_)) => Ok(Some(format!(
                        "I couldn't find account {} at {}. Check the details and try again, \
                         or \"cancel\".",
                        number,
                        bank_name(bank_code).unwrap_or(bank_code)
                    ))),
                    Err(e) => {
                        warn!(error = %e, "Account verification unavailable");
                        Ok(Some(
                            "I can't reach the bank network to verify that account right now. \
                             Try again in a moment."
                                .to_string(),
                        ))
                    }
                }
            }
        }
    }

    async fn execute_pending(
        &self,
        user: &UserRecord,
        pending: PendingTransfer,
    ) -> Result<String, EngineError> {
        let slots = pending.slots.clone();
        let (Some(amount), Some(number), Some(bank_code)) =
            (slots.amount, slots.account_number.clone(), slots.bank_code.clone())
        else {
            self.pending.delete(user.id).await?;
            return Ok("Something went missing from this transfer, so I stopped it. \
                       Nothing was sent."
                .to_string());
        };
        let reference = slots
            .reference
            .clone()
            .unwrap_or_else(|| ulid::Ulid::new().to_string());

        // Persist EXECUTING (with the reference) before touching money,
        // so a crash mid-flight is recoverable by key.
        let mut exec_slots = slots.clone();
        exec_slots.reference = Some(reference.clone());
        self.pending
            .upsert(&PendingTransfer::new(
                user.id,
                ConversationState::Executing,
                exec_slots,
            ))
            .await?;

        let outcome = match self
            .executor
            .execute(user.id, amount, &number, &bank_code, &reference)
            .await
        {
            Ok(outcome) => outcome,
            Err(ExecutorError::Ledger(LedgerError::InsufficientFunds)) => {
                self.pending.delete(user.id).await?;
                let fresh = self
                    .ledger
                    .get_user(user.id)
                    .await?
                    .ok_or(LedgerError::UserNotFound)?;
                return Ok(format!(
                    "Your balance changed and no longer covers this transfer ({} available). \
                     Nothing was sent.",
                    fresh.balance
                ));
            }
            Err(e) => return Err(e.into()),
        };

        match outcome {
            ExecuteOutcome::Completed(tx) => {
                if slots.save_candidate && slots.nickname.is_none() {
                    let mut save_slots = slots;
                    save_slots.reference = Some(reference);
                    self.pending
                        .upsert(&PendingTransfer::new(
                            user.id,
                            ConversationState::AwaitingSaveConfirm,
                            save_slots,
                        ))
                        .await?;
                    Ok(format!(
                        "{} Want me to save this recipient for next time? Reply with a \
                         nickname, or \"no\".",
                        self.terminal_reply(&tx)
                    ))
                } else {
                    self.pending.delete(user.id).await?;
                    Ok(self.terminal_reply(&tx))
                }
            }
            ExecuteOutcome::Failed { tx, reason } => {
                self.pending.delete(user.id).await?;
                Ok(format!(
                    "The transfer of {} didn't go through ({}). Your balance was not charged.",
                    tx.amount, reason
                ))
            }
            ExecuteOutcome::Unsettled(tx) => {
                self.pending.delete(user.id).await?;
                Ok(format!(
                    "Your transfer of {} is processing. I'll confirm as soon as the bank does; \
                     if it can't be completed the money comes straight back.",
                    tx.amount
                ))
            }
        }
    }

    async fn handle_beneficiaries(
        &self,
        user: &UserRecord,
        action: BeneficiaryAction,
    ) -> Result<String, EngineError> {
        match action {
            BeneficiaryAction::List => {
                let all = self.beneficiaries.list(user.id).await?;
                if all.is_empty() {
                    return Ok(
                        "You have no saved recipients yet. After a transfer I can save the \
                         recipient under a nickname."
                            .to_string(),
                    );
                }
                let lines: Vec<String> = all
                    .iter()
                    .map(|b| {
                        format!(
                            "{} - {} ({}, {})",
                            b.nickname,
                            b.account_name,
                            b.account_number,
                            bank_name(&b.bank_code).unwrap_or(&b.bank_code)
                        )
                    })
                    .collect();
                Ok(format!("Your saved recipients:\n{}", lines.join("\n")))
            }
            BeneficiaryAction::Remove(nickname) => {
                match self.beneficiaries.remove(user.id, &nickname).await {
                    Ok(()) => Ok(format!("Removed \"{}\".", nickname)),
                    Err(BeneficiaryError::NotFound(_)) => {
                        Ok(format!("I don't have \"{}\" saved.", nickname))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    // === Helpers ===

    async fn onboard(&self, chat_id: &str) -> Result<UserRecord, EngineError> {
        let account = self.allocate_account_number().await?;
        let user = self.ledger.create_user(chat_id, &account).await?;
        info!(user_id = user.id, "New user onboarded");
        Ok(user)
    }

    async fn allocate_account_number(&self) -> Result<String, EngineError> {
        use rand::Rng;
        for _ in 0..16 {
            let n: u32 = rand::thread_rng().gen_range(0..100_000_000);
            let candidate = format!("90{:08}", n);
            if self
                .ledger
                .find_user_by_account(&candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        Err(EngineError::Ledger(LedgerError::Storage(
            "could not allocate an account number".to_string(),
        )))
    }

    async fn cancel(&self, user_id: UserId) -> Result<String, EngineError> {
        self.pending.delete(user_id).await?;
        info!(user_id, "Transfer cancelled by user");
        Ok("Cancelled. Nothing was sent.".to_string())
    }

    async fn balance_reply(&self, user_id: UserId) -> Result<String, EngineError> {
        let user = self
            .ledger
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound)?;
        Ok(format!("Your balance is {}.", user.balance))
    }

    fn recipient_display(&self, slots: &TransferSlots) -> String {
        let name = slots
            .account_name
            .clone()
            .or_else(|| slots.nickname.clone())
            .unwrap_or_else(|| "them".to_string());
        match (&slots.account_number, &slots.bank_code) {
            (Some(number), Some(code)) => format!(
                "{} ({}, {})",
                name,
                number,
                bank_name(code).unwrap_or(code)
            ),
            _ => name,
        }
    }

    fn terminal_reply(&self, tx: &Transaction) -> String {
        match tx.status {
            crate::ledger::TxStatus::Completed => format!(
                "Done! {} sent. Fee {}. Ref {}.",
                tx.amount, tx.fee, tx.id
            ),
            crate::ledger::TxStatus::Failed => format!(
                "The transfer of {} didn't go through. Your balance was not charged.",
                tx.amount
            ),
            _ => format!("Your transfer of {} is still processing.", tx.amount),
        }
    }

    fn help_text(&self) -> String {
        "I can send money (\"send 5k to mom\" or \"send 2000 to 0123456789 GTBank\"), \
         check your balance (\"balance\"), and manage saved recipients (\"list my \
         beneficiaries\")."
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::store::InMemoryPendingStore;
    use crate::executor::ExecutorConfig;
    use crate::intent::MockNlpClient;
    use crate::ledger::memory::InMemoryLedger;
    use crate::profit::InMemoryProfitLedger;
    use crate::provider::{DisburseStatus, MockProvider};
    use std::time::Duration;

    struct Fixture {
        engine: ConversationEngine,
        ledger: Arc<InMemoryLedger>,
        provider: Arc<MockProvider>,
        pending: Arc<InMemoryPendingStore>,
    }

    fn fixture() -> Fixture {
        let ledger: Arc<InMemoryLedger> = Arc::new(InMemoryLedger::new());
        let provider = Arc::new(MockProvider::new());
        let profit = Arc::new(InMemoryProfitLedger::new());
        let pending = Arc::new(InMemoryPendingStore::new());
        let beneficiaries = Arc::new(crate::beneficiary::InMemoryBeneficiaries::new());
        let resolver = Arc::new(IntentResolver::new(Arc::new(MockNlpClient::new())));
        let executor = Arc::new(TransferExecutor::new(
            ledger.clone(),
            provider.clone(),
            profit,
            FeePolicy::default(),
            ExecutorConfig {
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
            },
        ));
        let engine = ConversationEngine::new(
            ledger.clone(),
            pending.clone(),
            beneficiaries,
            provider.clone(),
            resolver,
            executor,
            Arc::new(UserLocks::new()),
            FeePolicy::default(),
        );
        Fixture {
            engine,
            ledger,
            provider,
            pending,
        }
    }

    /// Onboard, set a PIN and fund the balance.
    async fn ready_user(f: &Fixture, chat: &str, naira: i64) -> UserId {
        f.engine.handle_message(chat, "hi").await.unwrap();
        f.engine.handle_message(chat, "set pin 1234").await.unwrap();
        let user = f.ledger.find_user_by_chat(chat).await.unwrap().unwrap();
        f.ledger
            .apply_credit(
                user.id,
                Amount::from_naira(naira).unwrap(),
                &format!("seed-{}", chat),
            )
            .await
            .unwrap();
        user.id
    }

    #[tokio::test]
    async fn test_full_happy_path_new_recipient() {
        let f = fixture();
        let uid = ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");

        let confirm = f
            .engine
            .handle_message("c1", "send 2k to 0123456789 gtbank")
            .await
            .unwrap();
        assert!(confirm.contains("ADA OBI"), "got: {}", confirm);
        assert!(confirm.contains("₦2,000.00"));
        assert!(confirm.contains("₦30.00"));

        let pin_prompt = f.engine.handle_message("c1", "yes").await.unwrap();
        assert!(pin_prompt.to_lowercase().contains("pin"));

        let done = f.engine.handle_message("c1", "1234").await.unwrap();
        assert!(done.contains("Done!"), "got: {}", done);
        assert!(done.contains("nickname"));

        let user = f.ledger.get_user(uid).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000 - 2030).unwrap());

        // Save the beneficiary
        let saved = f.engine.handle_message("c1", "ada").await.unwrap();
        assert!(saved.contains("Saved"));
        assert!(f.pending.get(uid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_beneficiary_shortcut_skips_confirmation() {
        let f = fixture();
        ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");

        f.engine
            .handle_message("c1", "send 1k to 0123456789 gtbank")
            .await
            .unwrap();
        f.engine.handle_message("c1", "yes").await.unwrap();
        f.engine.handle_message("c1", "1234").await.unwrap();
        f.engine.handle_message("c1", "ada").await.unwrap();

        // Known nickname goes straight to PIN
        let reply = f.engine.handle_message("c1", "send 500 to ada").await.unwrap();
        assert!(reply.contains("Enter your PIN"), "got: {}", reply);

        let done = f.engine.handle_message("c1", "1234").await.unwrap();
        assert!(done.contains("Done!"));
        // No save offer for an already-saved recipient
        assert!(!done.contains("nickname"));
    }

    #[tokio::test]
    async fn test_slot_filling_in_stages() {
        let f = fixture();
        ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "057", "BEN EZE");

        let ask_recipient = f.engine.handle_message("c1", "send 3k").await.unwrap();
        assert!(ask_recipient.contains("Who should receive"));

        let confirm = f
            .engine
            .handle_message("c1", "0123456789 zenith")
            .await
            .unwrap();
        assert!(confirm.contains("BEN EZE"), "got: {}", confirm);
        assert!(confirm.contains("₦3,000.00"));
    }

    #[tokio::test]
    async fn test_amount_asked_when_missing() {
        let f = fixture();
        ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");

        let ask = f
            .engine
            .handle_message("c1", "send to 0123456789 gtbank")
            .await
            .unwrap();
        assert!(ask.contains("How much"), "got: {}", ask);

        let confirm = f.engine.handle_message("c1", "2.5k").await.unwrap();
        assert!(confirm.contains("₦2,500.00"), "got: {}", confirm);
    }

    #[tokio::test]
    async fn test_cancel_honored_at_pin_entry() {
        let f = fixture();
        let uid = ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");

        f.engine
            .handle_message("c1", "send 2k to 0123456789 gtbank")
            .await
            .unwrap();
        f.engine.handle_message("c1", "yes").await.unwrap();
        let reply = f.engine.handle_message("c1", "cancel").await.unwrap();
        assert!(reply.contains("Cancelled"));
        assert!(f.pending.get(uid).await.unwrap().is_none());

        // No money moved
        let user = f.ledger.get_user(uid).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000).unwrap());
        assert_eq!(f.provider.disburse_count(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_suggests_topup() {
        let f = fixture();
        ready_user(&f, "c1", 100).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");

        let reply = f
            .engine
            .handle_message("c1", "send 5k to 0123456789 gtbank")
            .await
            .unwrap();
        assert!(reply.contains("don't have enough"), "got: {}", reply);
        // Suggests the user's own virtual account for funding
        let user = f.ledger.find_user_by_chat("c1").await.unwrap().unwrap();
        assert!(reply.contains(&user.account_number));
        assert_eq!(f.provider.disburse_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_pin_then_correct() {
        let f = fixture();
        ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");

        f.engine
            .handle_message("c1", "send 2k to 0123456789 gtbank")
            .await
            .unwrap();
        f.engine.handle_message("c1", "yes").await.unwrap();

        let wrong = f.engine.handle_message("c1", "9999").await.unwrap();
        assert!(wrong.contains("2 attempts left"), "got: {}", wrong);

        let done = f.engine.handle_message("c1", "1234").await.unwrap();
        assert!(done.contains("Done!"));
        assert_eq!(f.provider.disburse_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_nickname_asks_for_account() {
        let f = fixture();
        ready_user(&f, "c1", 10_000).await;

        let reply = f.engine.handle_message("c1", "send 1k to mom").await.unwrap();
        assert!(reply.contains("don't have \"mom\" saved"), "got: {}", reply);
    }

    #[tokio::test]
    async fn test_declined_transfer_reports_refund() {
        let f = fixture();
        let uid = ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");
        f.provider
            .script_disburse(Ok(DisburseStatus::Declined("account blocked".into())));

        f.engine
            .handle_message("c1", "send 2k to 0123456789 gtbank")
            .await
            .unwrap();
        f.engine.handle_message("c1", "yes").await.unwrap();
        let reply = f.engine.handle_message("c1", "1234").await.unwrap();
        assert!(reply.contains("didn't go through"), "got: {}", reply);

        let user = f.ledger.get_user(uid).await.unwrap().unwrap();
        assert_eq!(user.balance, Amount::from_naira(10_000).unwrap());
    }

    #[tokio::test]
    async fn test_balance_inquiry_mid_conversation() {
        let f = fixture();
        ready_user(&f, "c1", 10_000).await;

        f.engine.handle_message("c1", "send 3k").await.unwrap();
        let reply = f.engine.handle_message("c1", "balance").await.unwrap();
        assert!(reply.contains("₦10,000.00"));
    }

    #[tokio::test]
    async fn test_expired_pending_is_dropped() {
        let f = fixture();
        let uid = ready_user(&f, "c1", 10_000).await;

        f.engine.handle_message("c1", "send 3k").await.unwrap();
        // Force the TTL into the past
        let mut p = f.pending.get(uid).await.unwrap().unwrap();
        p.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
        f.pending.upsert(&p).await.unwrap();

        let reply = f.engine.handle_message("c1", "balance").await.unwrap();
        assert!(reply.contains("expired"), "got: {}", reply);
        assert!(reply.contains("₦10,000.00"));
        assert!(f.pending.get(uid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_user_gets_welcome() {
        let f = fixture();
        let reply = f.engine.handle_message("new-chat", "hello").await.unwrap();
        assert!(reply.contains("Welcome"), "got: {}", reply);
        assert!(reply.contains("set pin"));
        assert!(f
            .ledger
            .find_user_by_chat("new-chat")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_decline_save_offer() {
        let f = fixture();
        let uid = ready_user(&f, "c1", 10_000).await;
        f.provider.add_account("0123456789", "058", "ADA OBI");

        f.engine
            .handle_message("c1", "send 2k to 0123456789 gtbank")
            .await
            .unwrap();
        f.engine.handle_message("c1", "yes").await.unwrap();
        f.engine.handle_message("c1", "1234").await.unwrap();

        let reply = f.engine.handle_message("c1", "no").await.unwrap();
        assert!(reply.contains("won't save"));
        assert!(f.pending.get(uid).await.unwrap().is_none());
    }
}
