//! Conversation state machine states.
//!
//! State IDs are designed for PostgreSQL storage as SMALLINT. Forward
//! progress only: a pending transfer never returns to an earlier state,
//! it either advances or terminates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a pending transfer conversation stands.
///
/// Terminal states (COMPLETED, FAILED, CANCELLED) are never stored; a
/// conversation reaching one has its pending row deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ConversationState {
    /// No transfer in progress
    Idle = 0,
    /// Transfer intent recognized, recipient missing
    AwaitingRecipient = 10,
    /// Recipient known, amount missing
    AwaitingAmount = 20,
    /// All slots filled and account verified, awaiting user confirmation
    RecipientResolved = 30,
    /// Confirmed, awaiting PIN entry
    AwaitingPin = 40,
    /// PIN verified, ledger and provider work in flight
    Executing = 50,
    /// Transfer done, offering to save the new recipient as a beneficiary
    AwaitingSaveConfirm = 55,
    /// Transfer settled successfully
    Completed = 60,
    /// Transfer declined or refunded
    Failed = 70,
    /// User abandoned the transfer
    Cancelled = 80,
}

impl ConversationState {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ConversationState::Idle),
            10 => Some(ConversationState::AwaitingRecipient),
            20 => Some(ConversationState::AwaitingAmount),
            30 => Some(ConversationState::RecipientResolved),
            40 => Some(ConversationState::AwaitingPin),
            50 => Some(ConversationState::Executing),
            55 => Some(ConversationState::AwaitingSaveConfirm),
            60 => Some(ConversationState::Completed),
            70 => Some(ConversationState::Failed),
            80 => Some(ConversationState::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "IDLE",
            ConversationState::AwaitingRecipient => "AWAITING_RECIPIENT",
            ConversationState::AwaitingAmount => "AWAITING_AMOUNT",
            ConversationState::RecipientResolved => "RECIPIENT_RESOLVED",
            ConversationState::AwaitingPin => "AWAITING_PIN",
            ConversationState::Executing => "EXECUTING",
            ConversationState::AwaitingSaveConfirm => "AWAITING_SAVE_CONFIRM",
            ConversationState::Completed => "COMPLETED",
            ConversationState::Failed => "FAILED",
            ConversationState::Cancelled => "CANCELLED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversationState::Completed
                | ConversationState::Failed
                | ConversationState::Cancelled
        )
    }

    /// States in which a cancel intent is honored. Once executing, the
    /// money is already moving and only the ledger decides the outcome.
    #[inline]
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            ConversationState::AwaitingRecipient
                | ConversationState::AwaitingAmount
                | ConversationState::RecipientResolved
                | ConversationState::AwaitingPin
        )
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
