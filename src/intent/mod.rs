//! Intent understanding: rule-based parsing backed by a remote NLP
//! service for anything the rules cannot place.

pub mod banks;
pub mod parser;
pub mod resolver;
pub mod types;

pub use banks::{bank_name, find_bank_code};
pub use parser::normalize;
pub use resolver::{
    HttpNlpClient, IntentResolver, MockNlpClient, NlpClient, NlpError, NlpIntent,
    CONFIDENCE_THRESHOLD,
};
pub use types::{BeneficiaryAction, Intent, RecipientRef, Resolved};
