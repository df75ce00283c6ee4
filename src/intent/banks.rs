//! Bank name → CBN bank code lookup.
//!
//! Covers the banks users actually name in chat, including common
//! aliases. Matching is case-insensitive on whole words.

/// (canonical name, aliases, code)
const BANKS: &[(&str, &[&str], &str)] = &[
    ("Access Bank", &["access"], "044"),
    ("Citibank", &["citi"], "023"),
    ("Ecobank", &["eco"], "050"),
    ("Fidelity Bank", &["fidelity"], "070"),
    ("First Bank", &["firstbank", "fbn"], "011"),
    ("FCMB", &["first city monument"], "214"),
    ("GTBank", &["gtb", "gt bank", "guaranty trust", "gtco"], "058"),
    ("Heritage Bank", &["heritage"], "030"),
    ("Keystone Bank", &["keystone"], "082"),
    ("Kuda", &["kuda bank", "kudabank"], "50211"),
    ("Moniepoint", &["monie point"], "50515"),
    ("Opay", &["o pay", "paycom"], "999992"),
    ("Palmpay", &["palm pay"], "999991"),
    ("Polaris Bank", &["polaris"], "076"),
    ("Providus Bank", &["providus"], "101"),
    ("Stanbic IBTC", &["stanbic"], "221"),
    ("Sterling Bank", &["sterling"], "232"),
    ("UBA", &["united bank for africa"], "033"),
    ("Union Bank", &["union"], "032"),
    ("Unity Bank", &["unity"], "215"),
    ("Wema Bank", &["wema", "alat"], "035"),
    ("Zenith Bank", &["zenith"], "057"),
];

/// Find a bank code mentioned anywhere in `text`.
///
/// Also accepts a literal numeric code ("058") as its own token.
pub fn find_bank_code(text: &str) -> Option<(&'static str, &'static str)> {
    let lower = text.to_lowercase();
    for (name, aliases, code) in BANKS {
        if contains_word(&lower, &name.to_lowercase()) {
            return Some((name, code));
        }
        for alias in *aliases {
            if contains_word(&lower, alias) {
                return Some((name, code));
            }
        }
    }
    // Bare numeric code
    for token in lower.split_whitespace() {
        if let Some((name, code)) = BANKS
            .iter()
            .find(|(_, _, c)| *c == token)
            .map(|(n, _, c)| (*n, *c))
        {
            return Some((name, code));
        }
    }
    None
}

/// Canonical display name for a code, if known.
pub fn bank_name(code: &str) -> Option<&'static str> {
    BANKS.iter().find(|(_, _, c)| *c == code).map(|(n, _, _)| *n)
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let end = abs + needle.len();
        let before_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_banks() {
        assert_eq!(find_bank_code("send to 0123456789 gtb").unwrap().1, "058");
        assert_eq!(find_bank_code("Access bank please").unwrap().1, "044");
        assert_eq!(find_bank_code("my Opay account").unwrap().1, "999992");
        assert_eq!(find_bank_code("0123456789 zenith").unwrap().1, "057");
    }

    #[test]
    fn test_numeric_code() {
        assert_eq!(find_bank_code("0123456789 058").unwrap().1, "058");
    }

    #[test]
    fn test_word_boundaries() {
        // "ecosystem" must not match "eco"
        assert!(find_bank_code("the whole ecosystem").is_none());
        assert!(find_bank_code("nothing here").is_none());
    }

    #[test]
    fn test_bank_name() {
        assert_eq!(bank_name("058"), Some("GTBank"));
        assert_eq!(bank_name("000"), None);
    }
}
