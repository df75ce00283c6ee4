//! Outbound collaborator ports: chat transport and notifier.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use crate::ledger::{Transaction, UserId};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Outbound chat delivery. Inbound messages arrive through the gateway.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError>;
}

/// Receipts and alerts. Rendering is a different subsystem; this port
/// only carries the facts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_receipt(&self, user_id: UserId, tx: &Transaction) -> Result<(), NotifyError>;

    async fn send_alert(&self, user_id: UserId, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that only logs. Useful until a real delivery channel is
/// wired in, and for environments without one.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_receipt(&self, user_id: UserId, tx: &Transaction) -> Result<(), NotifyError> {
        info!(
            user_id,
            tx_id = %tx.id,
            kind = %tx.kind,
            amount = tx.amount.kobo(),
            "Receipt"
        );
        Ok(())
    }

    async fn send_alert(&self, user_id: UserId, message: &str) -> Result<(), NotifyError> {
        info!(user_id, message, "Alert");
        Ok(())
    }
}

/// HTTP chat transport posting outbound messages to the transport
/// service's send endpoint.
pub struct HttpChatTransport {
    client: reqwest::Client,
    send_url: String,
    api_key: String,
}

impl HttpChatTransport {
    pub fn new(send_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            send_url,
            api_key,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        self.client
            .post(&self.send_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }
}

/// Notifier that renders receipts and alerts as chat messages and
/// delivers them through a transport.
pub struct TransportNotifier {
    ledger: std::sync::Arc<dyn crate::ledger::LedgerStore>,
    transport: std::sync::Arc<dyn ChatTransport>,
}

impl TransportNotifier {
    pub fn new(
        ledger: std::sync::Arc<dyn crate::ledger::LedgerStore>,
        transport: std::sync::Arc<dyn ChatTransport>,
    ) -> Self {
        Self { ledger, transport }
    }

    async fn chat_id_for(&self, user_id: UserId) -> Result<String, NotifyError> {
        self.ledger
            .get_user(user_id)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .map(|u| u.chat_id)
            .ok_or_else(|| NotifyError::Delivery(format!("no user {}", user_id)))
    }
}

#[async_trait]
impl Notifier for TransportNotifier {
    async fn send_receipt(&self, user_id: UserId, tx: &Transaction) -> Result<(), NotifyError> {
        let chat_id = self.chat_id_for(user_id).await?;
        let text = match tx.kind {
            crate::ledger::TxKind::Credit => {
                format!("You received {}. Ref {}.", tx.amount, tx.id)
            }
            _ => format!(
                "Your transfer of {} is complete. Fee {}. Ref {}.",
                tx.amount, tx.fee, tx.id
            ),
        };
        self.transport.send(&chat_id, &text).await
    }

    async fn send_alert(&self, user_id: UserId, message: &str) -> Result<(), NotifyError> {
        let chat_id = self.chat_id_for(user_id).await?;
        self.transport.send(&chat_id, message).await
    }
}

/// Recording transport for tests: captures every outbound message.
#[derive(Default)]
pub struct RecordingTransport {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last_for(&self, chat_id: &str) -> Option<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| c == chat_id)
            .map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Recording notifier for tests.
#[derive(Default)]
pub struct RecordingNotifier {
    receipts: Mutex<Vec<(UserId, String)>>,
    alerts: Mutex<Vec<(UserId, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipt_count(&self) -> usize {
        self.receipts.lock().unwrap().len()
    }

    pub fn alerts(&self) -> Vec<(UserId, String)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_receipt(&self, user_id: UserId, tx: &Transaction) -> Result<(), NotifyError> {
        self.receipts
            .lock()
            .unwrap()
            .push((user_id, tx.id.to_string()));
        Ok(())
    }

    async fn send_alert(&self, user_id: UserId, message: &str) -> Result<(), NotifyError> {
        self.alerts
            .lock()
            .unwrap()
            .push((user_id, message.to_string()));
        Ok(())
    }
}
