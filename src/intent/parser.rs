//! Rule-based intent parsing.
//!
//! The deterministic fast path: confirmations, cancellations, balance
//! checks, amounts, account numbers and nicknames are recognized here
//! without a network call. Anything this parser cannot place goes to
//! the NLP client.

use super::banks::find_bank_code;
use super::types::{BeneficiaryAction, Intent, RecipientRef};
use crate::money::{parse_amount, Amount};

/// Lowercase, trim, collapse internal whitespace. Also the NLP cache key.
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const YES_WORDS: &[&str] = &["yes", "y", "yeah", "yep", "sure", "ok", "okay", "confirm"];
const NO_WORDS: &[&str] = &["no", "n", "nope", "nah", "don't", "dont save"];
const CANCEL_WORDS: &[&str] = &["cancel", "stop", "abort", "forget it", "never mind", "nevermind"];
const TRANSFER_VERBS: &[&str] = &["send", "transfer", "pay", "give", "wire"];

/// Exact cancel-phrase check, for states that skip full parsing.
pub fn is_cancel(text: &str) -> bool {
    CANCEL_WORDS.contains(&normalize(text).as_str())
}

/// Exact yes check.
pub fn is_yes(text: &str) -> bool {
    YES_WORDS.contains(&normalize(text).as_str())
}

/// Exact no check.
pub fn is_no(text: &str) -> bool {
    NO_WORDS.contains(&normalize(text).as_str())
}

/// Try to parse without NLP. `None` means the rules don't apply and the
/// resolver should fall through to the NLP client.
pub fn parse(text: &str) -> Option<Intent> {
    let norm = normalize(text);
    if norm.is_empty() {
        return None;
    }

    if YES_WORDS.contains(&norm.as_str()) {
        return Some(Intent::ConfirmYes);
    }
    if NO_WORDS.contains(&norm.as_str()) {
        return Some(Intent::ConfirmNo);
    }
    if CANCEL_WORDS.iter().any(|w| norm == *w) {
        return Some(Intent::Cancel);
    }

    if norm.contains("balance") || norm.contains("how much do i have") {
        return Some(Intent::BalanceInquiry);
    }

    if norm.contains("beneficiar") || norm.contains("saved recipient") {
        if let Some(rest) = norm
            .strip_prefix("remove beneficiary")
            .or_else(|| norm.strip_prefix("delete beneficiary"))
        {
            let nick = rest.trim();
            if !nick.is_empty() {
                return Some(Intent::Beneficiaries(BeneficiaryAction::Remove(
                    nick.to_string(),
                )));
            }
        }
        return Some(Intent::Beneficiaries(BeneficiaryAction::List));
    }

    let starts_with_verb = TRANSFER_VERBS
        .iter()
        .any(|v| norm.starts_with(&format!("{} ", v)));
    if starts_with_verb {
        let amount = extract_amount(&norm);
        let recipient = extract_recipient(&norm);
        return Some(Intent::Transfer { amount, recipient });
    }

    // A bare amount or bare account details only make sense inside a
    // pending conversation; the state machine asks for them explicitly.
    if let Ok(amount) = parse_amount(&norm) {
        return Some(Intent::Transfer {
            amount: Some(amount),
            recipient: None,
        });
    }
    if let Some(recipient) = extract_account(&norm) {
        return Some(Intent::Transfer {
            amount: None,
            recipient: Some(recipient),
        });
    }

    None
}

/// First token that parses as an amount.
pub fn extract_amount(norm: &str) -> Option<Amount> {
    let tokens: Vec<&str> = norm.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        // skip 10-digit runs; those are account numbers
        if is_account_number(token) {
            continue;
        }
        if let Ok(a) = parse_amount(token) {
            return Some(a);
        }
        // "NGN 5000" / "₦ 5,000" split across two tokens
        if i + 1 < tokens.len() && !is_account_number(tokens[i + 1]) {
            if let Ok(a) = parse_amount(&format!("{}{}", token, tokens[i + 1])) {
                return Some(a);
            }
        }
    }
    None
}

/// Account number + bank, or a trailing "to <nickname>".
pub fn extract_recipient(norm: &str) -> Option<RecipientRef> {
    if let Some(account) = extract_account(norm) {
        return Some(account);
    }
    // "send 5k to mom" - nickname is whatever follows the last " to "
    let after_to = norm.rsplit_once(" to ")?.1.trim();
    if after_to.is_empty() {
        return None;
    }
    // Strip amount-looking tokens the user put after the name
    let nick: Vec<&str> = after_to
        .split_whitespace()
        .filter(|t| parse_amount(t).is_err())
        .collect();
    if nick.is_empty() {
        return None;
    }
    Some(RecipientRef::Nickname(nick.join(" ")))
}

/// A 10-digit run plus a recognizable bank anywhere in the text.
pub fn extract_account(norm: &str) -> Option<RecipientRef> {
    let number = norm
        .split_whitespace()
        .find(|t| is_account_number(t))?
        .to_string();
    let (_, bank_code) = find_bank_code(norm)?;
    Some(RecipientRef::Account {
        number,
        bank_code: bank_code.to_string(),
    })
}

fn is_account_number(token: &str) -> bool {
    token.len() == 10 && token.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmations() {
        assert_eq!(parse("yes"), Some(Intent::ConfirmYes));
        assert_eq!(parse("  OKAY "), Some(Intent::ConfirmYes));
        assert_eq!(parse("no"), Some(Intent::ConfirmNo));
        assert_eq!(parse("cancel"), Some(Intent::Cancel));
        assert_eq!(parse("never mind"), Some(Intent::Cancel));
    }

    #[test]
    fn test_balance() {
        assert_eq!(parse("what's my balance?"), Some(Intent::BalanceInquiry));
        assert_eq!(parse("Balance"), Some(Intent::BalanceInquiry));
    }

    #[test]
    fn test_beneficiaries() {
        assert_eq!(
            parse("list my beneficiaries"),
            Some(Intent::Beneficiaries(BeneficiaryAction::List))
        );
        assert_eq!(
            parse("remove beneficiary mom"),
            Some(Intent::Beneficiaries(BeneficiaryAction::Remove("mom".into())))
        );
    }

    #[test]
    fn test_transfer_with_nickname() {
        let intent = parse("send 5k to mom").unwrap();
        assert_eq!(
            intent,
            Intent::Transfer {
                amount: Some(Amount::from_naira(5000).unwrap()),
                recipient: Some(RecipientRef::Nickname("mom".into())),
            }
        );
    }

    #[test]
    fn test_transfer_with_account() {
        let intent = parse("transfer ₦2,000 to 0123456789 GTBank").unwrap();
        assert_eq!(
            intent,
            Intent::Transfer {
                amount: Some(Amount::from_naira(2000).unwrap()),
                recipient: Some(RecipientRef::Account {
                    number: "0123456789".into(),
                    bank_code: "058".into(),
                }),
            }
        );
    }

    #[test]
    fn test_transfer_missing_amount() {
        let intent = parse("send to mom").unwrap();
        assert_eq!(
            intent,
            Intent::Transfer {
                amount: None,
                recipient: Some(RecipientRef::Nickname("mom".into())),
            }
        );
    }

    #[test]
    fn test_bare_amount_reply() {
        let intent = parse("1.5k").unwrap();
        assert_eq!(
            intent,
            Intent::Transfer {
                amount: Some(Amount::from_naira(1500).unwrap()),
                recipient: None,
            }
        );
    }

    #[test]
    fn test_bare_account_reply() {
        let intent = parse("0123456789 zenith").unwrap();
        assert_eq!(
            intent,
            Intent::Transfer {
                amount: None,
                recipient: Some(RecipientRef::Account {
                    number: "0123456789".into(),
                    bank_code: "057".into(),
                }),
            }
        );
    }

    #[test]
    fn test_amount_is_not_account_number() {
        // ten-digit amounts are treated as account numbers, not money
        let intent = parse("send 5000 to 0123456789 uba").unwrap();
        assert_eq!(
            intent,
            Intent::Transfer {
                amount: Some(Amount::from_naira(5000).unwrap()),
                recipient: Some(RecipientRef::Account {
                    number: "0123456789".into(),
                    bank_code: "033".into(),
                }),
            }
        );
    }

    #[test]
    fn test_unparseable_falls_through() {
        assert_eq!(parse("hmm what can you do"), None);
        assert_eq!(parse(""), None);
    }
}
