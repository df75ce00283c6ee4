//! Conversational transfer flow: states, pending-transfer persistence,
//! the engine that drives a chat turn, and the expiry sweeper.

pub mod machine;
pub mod state;
pub mod store;
pub mod sweeper;

pub use machine::{ConversationEngine, EngineError};
pub use state::ConversationState;
pub use store::{
    InMemoryPendingStore, PendingStateStore, PendingStoreError, PendingTransfer, PgPendingStore,
    TransferSlots, PENDING_TTL_MINUTES,
};
pub use sweeper::ExpirySweeper;
