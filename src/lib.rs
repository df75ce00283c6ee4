//! Kudi - chat-driven banking backend.
//!
//! Conversational transfers over a single-balance ledger, built around
//! one rule: money state must stay correct even when the chat layer,
//! the NLP service or the bank rail misbehaves.
//!
//! # Modules
//!
//! - [`money`] - integer-kobo amounts and chat amount parsing
//! - [`intent`] - rule-based intent parsing + NLP fallback
//! - [`conversation`] - the transfer state machine and pending storage
//! - [`auth_gate`] - PIN hashing, verification and lockout
//! - [`ledger`] - balances and immutable transaction records
//! - [`executor`] - debit-then-disburse execution and settlement
//! - [`reconciler`] - signed deposit webhooks, idempotent credits
//! - [`beneficiary`] - saved recipients
//! - [`profit`] - fee/profit accounting
//! - [`fees`] - the fee policy table
//! - [`provider`] - disbursement provider port
//! - [`gateway`] - the HTTP surface

pub mod auth_gate;
pub mod beneficiary;
pub mod config;
pub mod conversation;
pub mod db;
pub mod executor;
pub mod fees;
pub mod gateway;
pub mod intent;
pub mod ledger;
pub mod locks;
pub mod logging;
pub mod money;
pub mod notifier;
pub mod profit;
pub mod provider;
pub mod reconciler;

// Convenient re-exports at crate root
pub use auth_gate::{PinGate, PinVerification};
pub use conversation::{ConversationEngine, ConversationState, PendingTransfer};
pub use executor::{SettlementWorker, TransferExecutor};
pub use fees::{FeePolicy, FeeQuote};
pub use intent::{Intent, IntentResolver};
pub use ledger::{LedgerStore, Transaction, TransactionId, TxKind, TxStatus, UserId};
pub use money::{parse_amount, Amount};
pub use reconciler::CreditReconciler;
