//! Ledger Store: durable balances + immutable transaction records.
//!
//! The trait in [`store`] is the only way balances change. [`memory`]
//! backs tests and local development; [`postgres`] is the durable
//! implementation.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;
pub use store::{CreditOutcome, DebitOutcome, LedgerError, LedgerStore};
pub use types::{Transaction, TransactionId, TxKind, TxStatus, UserId, UserRecord};
