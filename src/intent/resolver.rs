//! Intent Resolver: rules first, then the remote NLP service behind a
//! deterministic cache.
//!
//! The cache is keyed on normalized input, so a repeated phrase maps to
//! the same intent without a second network call and tests stay
//! reproducible.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::parser;
use super::types::{BeneficiaryAction, Intent, RecipientRef, Resolved};
use crate::money::Amount;

/// Below this confidence an NLP result is treated as ambiguous.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

#[derive(Debug, Error)]
pub enum NlpError {
    #[error("NLP service unavailable: {0}")]
    Unavailable(String),

    #[error("NLP protocol error: {0}")]
    Protocol(String),
}

/// Raw NLP service output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpIntent {
    pub intent: String,
    #[serde(default)]
    pub amount_naira: Option<i64>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    pub confidence: f32,
}

#[async_trait]
pub trait NlpClient: Send + Sync {
    async fn interpret(&self, text: &str) -> Result<NlpIntent, NlpError>;
}

pub struct IntentResolver {
    nlp: Arc<dyn NlpClient>,
    cache: DashMap<String, Resolved>,
}

impl IntentResolver {
    pub fn new(nlp: Arc<dyn NlpClient>) -> Self {
        Self {
            nlp,
            cache: DashMap::new(),
        }
    }

    /// Resolve free text to an intent.
    ///
    /// Never guesses: an NLP result under the confidence threshold (or
    /// an NLP outage) yields `Ambiguous`, which the conversation engine
    /// turns into a clarifying question.
    pub async fn resolve(&self, text: &str) -> Resolved {
        if let Some(intent) = parser::parse(text) {
            return Resolved::Intent(intent);
        }

        let key = parser::normalize(text);
        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %key, "NLP cache hit");
            return hit.clone();
        }

        let resolved = match self.nlp.interpret(&key).await {
            Ok(raw) => Self::convert(raw),
            Err(e) => {
                warn!(error = %e, "NLP call failed, treating as ambiguous");
                return Resolved::Ambiguous;
            }
        };
        self.cache.insert(key, resolved.clone());
        resolved
    }

    fn convert(raw: NlpIntent) -> Resolved {
        if raw.confidence < CONFIDENCE_THRESHOLD {
            return Resolved::Ambiguous;
        }
        let intent = match raw.intent.as_str() {
            "transfer" => {
                let amount = raw
                    .amount_naira
                    .and_then(|n| Amount::from_naira(n).ok())
                    .filter(|a| !a.is_zero());
                let recipient = match (raw.account_number, raw.bank) {
                    (Some(number), Some(bank)) => super::banks::find_bank_code(&bank)
                        .map(|(_, code)| RecipientRef::Account {
                            number,
                            bank_code: code.to_string(),
                        }),
                    _ => raw.recipient_name.map(RecipientRef::Nickname),
                };
                Intent::Transfer { amount, recipient }
            }
            "balance_inquiry" => Intent::BalanceInquiry,
            "beneficiary_management" => match raw.recipient_name {
                Some(nick) => Intent::Beneficiaries(BeneficiaryAction::Remove(nick)),
                None => Intent::Beneficiaries(BeneficiaryAction::List),
            },
            "confirm_yes" => Intent::ConfirmYes,
            "confirm_no" => Intent::ConfirmNo,
            "cancel" => Intent::Cancel,
            other => Intent::Other(other.to_string()),
        };
        Resolved::Intent(intent)
    }
}

/// HTTP NLP client.
pub struct HttpNlpClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpNlpClient {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl NlpClient for HttpNlpClient {
    async fn interpret(&self, text: &str) -> Result<NlpIntent, NlpError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| NlpError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NlpError::Unavailable(resp.status().to_string()));
        }
        resp.json()
            .await
            .map_err(|e| NlpError::Protocol(e.to_string()))
    }
}

/// Scripted NLP client for tests: fixed answers per normalized input.
#[derive(Default)]
pub struct MockNlpClient {
    answers: DashMap<String, NlpIntent>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockNlpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, text: &str, answer: NlpIntent) {
        self.answers.insert(parser::normalize(text), answer);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl NlpClient for MockNlpClient {
    async fn interpret(&self, text: &str) -> Result<NlpIntent, NlpError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.answers
            .get(&parser::normalize(text))
            .map(|a| a.clone())
            .ok_or_else(|| NlpError::Unavailable("no scripted answer".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(answers: &[(&str, NlpIntent)]) -> (IntentResolver, Arc<MockNlpClient>) {
        let mock = Arc::new(MockNlpClient::new());
        for (text, answer) in answers {
            mock.script(text, answer.clone());
        }
        (IntentResolver::new(mock.clone()), mock)
    }

    fn nlp(intent: &str, confidence: f32) -> NlpIntent {
        NlpIntent {
            intent: intent.to_string(),
            amount_naira: None,
            recipient_name: None,
            account_number: None,
            bank: None,
            confidence,
        }
    }

    #[tokio::test]
    async fn test_rules_bypass_nlp() {
        let (resolver, mock) = resolver_with(&[]);
        let r = resolver.resolve("send 5k to mom").await;
        assert!(matches!(r, Resolved::Intent(Intent::Transfer { .. })));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_nlp_result_cached() {
        let (resolver, mock) =
            resolver_with(&[("i want to check my account standing", nlp("balance_inquiry", 0.9))]);

        let first = resolver.resolve("I want to check my account standing").await;
        assert_eq!(first, Resolved::Intent(Intent::BalanceInquiry));

        // Same normalized input: served from cache
        let second = resolver.resolve("  i want to CHECK my account standing ").await;
        assert_eq!(second, Resolved::Intent(Intent::BalanceInquiry));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_is_ambiguous() {
        let (resolver, _) = resolver_with(&[("do the thing", nlp("transfer", 0.3))]);
        assert_eq!(resolver.resolve("do the thing").await, Resolved::Ambiguous);
    }

    #[tokio::test]
    async fn test_nlp_outage_is_ambiguous_and_not_cached() {
        let (resolver, mock) = resolver_with(&[]);
        assert_eq!(resolver.resolve("something weird").await, Resolved::Ambiguous);
        // Outage results are not cached; a later retry hits NLP again
        assert_eq!(resolver.resolve("something weird").await, Resolved::Ambiguous);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_nlp_transfer_slots() {
        let mut answer = nlp("transfer", 0.95);
        answer.amount_naira = Some(50_000);
        answer.recipient_name = Some("that girl".to_string());
        let (resolver, _) = resolver_with(&[("abeg settle that girl with 50k", answer)]);

        let r = resolver.resolve("abeg settle that girl with 50k").await;
        match r {
            Resolved::Intent(Intent::Transfer { amount, recipient }) => {
                assert_eq!(amount, Some(Amount::from_naira(50_000).unwrap()));
                assert_eq!(recipient, Some(RecipientRef::Nickname("that girl".into())));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
