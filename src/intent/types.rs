//! Intent types.
//!
//! Intents form a closed set so the state machine can match
//! exhaustively; there is no string-keyed dispatch anywhere.

use serde::{Deserialize, Serialize};

use crate::money::Amount;

/// How the user referred to the money's destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientRef {
    /// A saved-beneficiary nickname ("mom", "my landlord")
    Nickname(String),
    /// Explicit account number + bank code
    Account { number: String, bank_code: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeneficiaryAction {
    List,
    Remove(String),
}

/// What the user wants. Closed set; everything unrecognized is `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    Transfer {
        amount: Option<Amount>,
        recipient: Option<RecipientRef>,
    },
    BalanceInquiry,
    Beneficiaries(BeneficiaryAction),
    ConfirmYes,
    ConfirmNo,
    Cancel,
    Other(String),
}

/// Resolver output. Low NLP confidence never becomes a guessed intent;
/// it becomes `Ambiguous`, which the state machine turns into a
/// clarifying question.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Intent(Intent),
    Ambiguous,
}
