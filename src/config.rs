use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL. When absent, everything runs on the
    /// in-memory stores (useful for development and tests).
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub nlp: NlpConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Disbursement provider connection.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Disbursement retry attempts before parking the row as unsettled
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9400".to_string(),
            api_key: String::new(),
            timeout_secs: 15,
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NlpConfig {
    pub url: String,
    pub api_key: String,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9500/v1/interpret".to_string(),
            api_key: String::new(),
        }
    }
}

/// Outbound chat transport. Empty URL keeps the log-only notifier.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ChatConfig {
    #[serde(default)]
    pub send_url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Shared secret for deposit webhook HMAC signatures
    pub secret: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: "change-me".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    pub settlement_scan_secs: u64,
    /// Unsettled rows younger than this are left to the executor
    pub settlement_stale_secs: i64,
    pub expiry_scan_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            settlement_scan_secs: 30,
            settlement_stale_secs: 60,
            expiry_scan_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
