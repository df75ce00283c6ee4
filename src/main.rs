//! Kudi - chat-driven banking backend.
//!
//! This is the service entry point. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌──────────┐    ┌──────────┐
//! │ Gateway  │───▶│Conversation│───▶│ Executor │───▶│ Provider │
//! │ (chat +  │    │  Engine    │    │ (ledger  │    │  (bank   │
//! │ webhooks)│    │ (per-user) │    │  first!) │    │   rail)  │
//! └──────────┘    └────────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Background tasks: settlement worker (resolves UNSETTLED rows against
//! the provider) and expiry sweeper (drops abandoned conversations).

use std::sync::Arc;
use std::time::Duration;

use kudi::beneficiary::{BeneficiaryStore, InMemoryBeneficiaries};
use kudi::config::AppConfig;
use kudi::conversation::{
    ConversationEngine, ExpirySweeper, InMemoryPendingStore, PendingStateStore, PgPendingStore,
};
use kudi::db::Database;
use kudi::executor::{ExecutorConfig, SettlementWorker, TransferExecutor};
use kudi::fees::FeePolicy;
use kudi::gateway::state::AppState;
use kudi::intent::{HttpNlpClient, IntentResolver};
use kudi::ledger::{InMemoryLedger, LedgerStore, PgLedger};
use kudi::locks::UserLocks;
use kudi::notifier::{HttpChatTransport, LogNotifier, Notifier, TransportNotifier};
use kudi::profit::{InMemoryProfitLedger, ProfitStore};
use kudi::provider::{DisbursementProvider, HttpProvider};
use kudi::reconciler::CreditReconciler;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

struct Stores {
    ledger: Arc<dyn LedgerStore>,
    pending: Arc<dyn PendingStateStore>,
    beneficiaries: Arc<dyn BeneficiaryStore>,
    profit: Arc<dyn ProfitStore>,
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            let pool = db.pool().clone();

            let ledger = PgLedger::new(pool.clone());
            ledger.ensure_schema().await?;
            let pending = PgPendingStore::new(pool.clone());
            pending.ensure_schema().await?;
            let beneficiaries = kudi::beneficiary::postgres::PgBeneficiaries::new(pool.clone());
            beneficiaries.ensure_schema().await?;
            let profit = kudi::profit::postgres::PgProfitLedger::new(pool);
            profit.ensure_schema().await?;

            Ok(Stores {
                ledger: Arc::new(ledger),
                pending: Arc::new(pending),
                beneficiaries: Arc::new(beneficiaries),
                profit: Arc::new(profit),
            })
        }
        None => {
            tracing::warn!("No postgres_url configured; using in-memory stores (volatile!)");
            Ok(Stores {
                ledger: Arc::new(InMemoryLedger::new()),
                pending: Arc::new(InMemoryPendingStore::new()),
                beneficiaries: Arc::new(InMemoryBeneficiaries::new()),
                profit: Arc::new(InMemoryProfitLedger::new()),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = kudi::logging::init_logging(&config);

    tracing::info!(
        version = env!("GIT_HASH"),
        env,
        "Starting Kudi transaction engine"
    );

    let stores = build_stores(&config).await?;

    let provider: Arc<dyn DisbursementProvider> = Arc::new(HttpProvider::new(
        config.provider.base_url.clone(),
        config.provider.api_key.clone(),
        Duration::from_secs(config.provider.timeout_secs),
    ));

    let notifier: Arc<dyn Notifier> = if config.chat.send_url.is_empty() {
        tracing::warn!("No chat send_url configured; receipts go to the log only");
        Arc::new(LogNotifier)
    } else {
        Arc::new(TransportNotifier::new(
            stores.ledger.clone(),
            Arc::new(HttpChatTransport::new(
                config.chat.send_url.clone(),
                config.chat.api_key.clone(),
            )),
        ))
    };

    let resolver = Arc::new(IntentResolver::new(Arc::new(HttpNlpClient::new(
        config.nlp.url.clone(),
        config.nlp.api_key.clone(),
    ))));

    let executor = Arc::new(TransferExecutor::new(
        stores.ledger.clone(),
        provider.clone(),
        stores.profit.clone(),
        FeePolicy::default(),
        ExecutorConfig {
            max_attempts: config.provider.max_attempts,
            backoff_base: Duration::from_millis(config.provider.backoff_base_ms),
        },
    ));

    let locks = Arc::new(UserLocks::new());

    let engine = Arc::new(ConversationEngine::new(
        stores.ledger.clone(),
        stores.pending.clone(),
        stores.beneficiaries.clone(),
        provider.clone(),
        resolver,
        executor,
        locks.clone(),
        FeePolicy::default(),
    ));

    let reconciler = Arc::new(CreditReconciler::new(
        stores.ledger.clone(),
        notifier.clone(),
        locks,
    ));

    let settlement = SettlementWorker::new(
        stores.ledger.clone(),
        provider,
        stores.profit.clone(),
        notifier.clone(),
        Duration::from_secs(config.workers.settlement_scan_secs),
        chrono::Duration::seconds(config.workers.settlement_stale_secs),
    );
    tokio::spawn(settlement.run());

    let sweeper = ExpirySweeper::new(
        stores.pending.clone(),
        notifier,
        Duration::from_secs(config.workers.expiry_scan_secs),
    );
    tokio::spawn(sweeper.run());

    let state = Arc::new(AppState {
        engine,
        reconciler,
        webhook_secret: config.webhook.secret.clone().into_bytes(),
    });

    kudi::gateway::run_server(&config.gateway.host, config.gateway.port, state).await;
    Ok(())
}
