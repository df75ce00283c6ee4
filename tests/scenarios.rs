//! End-to-end scenarios across the whole engine: chat turns, deposit
//! webhooks, execution, settlement and the ledger invariants that must
//! hold through all of it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};

use kudi::beneficiary::InMemoryBeneficiaries;
use kudi::conversation::{ConversationEngine, InMemoryPendingStore};
use kudi::executor::{ExecutorConfig, SettlementWorker, TransferExecutor};
use kudi::fees::FeePolicy;
use kudi::gateway::handlers::{self, SIGNATURE_HEADER};
use kudi::gateway::state::AppState;
use kudi::intent::{IntentResolver, MockNlpClient};
use kudi::ledger::{InMemoryLedger, LedgerStore, TxStatus};
use kudi::locks::UserLocks;
use kudi::profit::ProfitStore;
use kudi::money::Amount;
use kudi::notifier::RecordingNotifier;
use kudi::provider::{DisburseStatus, MockProvider, ProviderError};
use kudi::reconciler::{self, CreditReconciler};

const WEBHOOK_SECRET: &[u8] = b"test-webhook-secret";

struct World {
    ledger: Arc<InMemoryLedger>,
    provider: Arc<MockProvider>,
    profit: Arc<kudi::profit::InMemoryProfitLedger>,
    notifier: Arc<RecordingNotifier>,
    engine: Arc<ConversationEngine>,
    state: Arc<AppState>,
    settlement: SettlementWorker,
}

fn world() -> World {
    let ledger = Arc::new(InMemoryLedger::new());
    let provider = Arc::new(MockProvider::new());
    let profit = Arc::new(kudi::profit::InMemoryProfitLedger::new());
    let pending = Arc::new(InMemoryPendingStore::new());
    let beneficiaries = Arc::new(InMemoryBeneficiaries::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let locks = Arc::new(UserLocks::new());
    let resolver = Arc::new(IntentResolver::new(Arc::new(MockNlpClient::new())));

    let executor = Arc::new(TransferExecutor::new(
        ledger.clone(),
        provider.clone(),
        profit.clone(),
        FeePolicy::default(),
        ExecutorConfig {
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
        },
    ));

    let engine = Arc::new(ConversationEngine::new(
        ledger.clone(),
        pending,
        beneficiaries,
        provider.clone(),
        resolver,
        executor,
        locks.clone(),
        FeePolicy::default(),
    ));

    let reconciler = Arc::new(CreditReconciler::new(
        ledger.clone(),
        notifier.clone(),
        locks,
    ));

    let settlement = SettlementWorker::new(
        ledger.clone(),
        provider.clone(),
        profit.clone(),
        notifier.clone(),
        Duration::from_secs(30),
        chrono::Duration::zero(),
    );

    let state = Arc::new(AppState {
        engine: engine.clone(),
        reconciler,
        webhook_secret: WEBHOOK_SECRET.to_vec(),
    });

    World {
        ledger,
        provider,
        profit,
        notifier,
        engine,
        state,
        settlement,
    }
}

async fn chat(w: &World, chat_id: &str, text: &str) -> String {
    w.engine.handle_message(chat_id, text).await.unwrap()
}

/// Onboard a user, set a PIN, and return their virtual account number.
async fn onboard(w: &World, chat_id: &str) -> String {
    chat(w, chat_id, "hello").await;
    chat(w, chat_id, "set pin 1234").await;
    w.ledger
        .find_user_by_chat(chat_id)
        .await
        .unwrap()
        .unwrap()
        .account_number
}

async fn webhook(w: &World, body: &str, sign_with: &[u8]) -> StatusCode {
    let mut headers = HeaderMap::new();
    let sig = reconciler::sign(sign_with, body.as_bytes());
    headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
    let resp = handlers::deposit_webhook(
        State(w.state.clone()),
        headers,
        Bytes::copy_from_slice(body.as_bytes()),
    )
    .await;
    resp.status()
}

async fn balance_of(w: &World, chat_id: &str) -> Amount {
    w.ledger
        .find_user_by_chat(chat_id)
        .await
        .unwrap()
        .unwrap()
        .balance
}

#[tokio::test]
async fn deposit_then_transfer_end_to_end() {
    let w = world();
    let account = onboard(&w, "alice").await;
    w.provider.add_account("0123456789", "058", "ADA OBI");

    // Deposit ₦10,000 through the signed webhook
    let body = format!(
        r#"{{"reference":"dep-1","account_number":"{}","amount_kobo":1000000}}"#,
        account
    );
    assert_eq!(webhook(&w, &body, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(balance_of(&w, "alice").await, Amount::from_naira(10_000).unwrap());
    assert_eq!(w.notifier.receipt_count(), 1);

    // Transfer ₦2,000 by chat
    let confirm = chat(&w, "alice", "send 2k to 0123456789 gtbank").await;
    assert!(confirm.contains("ADA OBI"), "got: {}", confirm);
    chat(&w, "alice", "yes").await;
    let done = chat(&w, "alice", "1234").await;
    assert!(done.contains("Done!"), "got: {}", done);

    // ₦2,000 principal + ₦30 fee gone
    assert_eq!(
        balance_of(&w, "alice").await,
        Amount::from_naira(10_000 - 2030).unwrap()
    );
    // ₦10 of the fee is profit
    let summary = w.profit.summarize(None, None).await.unwrap();
    assert_eq!(summary.total_profit, Amount::from_naira(10).unwrap());
    assert!(summary.total_profit <= summary.total_fees);
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let w = world();
    let account = onboard(&w, "alice").await;

    let body = format!(
        r#"{{"reference":"dep-1","account_number":"{}","amount_kobo":1000000}}"#,
        account
    );
    assert_eq!(
        webhook(&w, &body, b"wrong-secret").await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(balance_of(&w, "alice").await, Amount::ZERO);
}

#[tokio::test]
async fn duplicate_webhook_credits_once() {
    let w = world();
    let account = onboard(&w, "alice").await;

    let body = format!(
        r#"{{"reference":"dep-1","account_number":"{}","amount_kobo":500000}}"#,
        account
    );
    assert_eq!(webhook(&w, &body, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(webhook(&w, &body, WEBHOOK_SECRET).await, StatusCode::OK);

    assert_eq!(balance_of(&w, "alice").await, Amount::from_naira(5000).unwrap());
}

#[tokio::test]
async fn unknown_account_webhook_returns_ok_and_credits_nobody() {
    let w = world();
    onboard(&w, "alice").await;

    let body = r#"{"reference":"dep-x","account_number":"0000000000","amount_kobo":500000}"#;
    assert_eq!(webhook(&w, body, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(balance_of(&w, "alice").await, Amount::ZERO);
}

#[tokio::test]
async fn provider_outage_parks_unsettled_then_settles() {
    let w = world();
    let account = onboard(&w, "alice").await;
    w.provider.add_account("0123456789", "058", "ADA OBI");
    let body = format!(
        r#"{{"reference":"dep-1","account_number":"{}","amount_kobo":1000000}}"#,
        account
    );
    webhook(&w, &body, WEBHOOK_SECRET).await;

    // Both attempts time out; the debit must stay applied
    w.provider.script_disburse(Err(ProviderError::Timeout));
    w.provider.script_disburse(Err(ProviderError::Timeout));

    chat(&w, "alice", "send 2k to 0123456789 gtbank").await;
    chat(&w, "alice", "yes").await;
    let reply = chat(&w, "alice", "1234").await;
    assert!(reply.contains("processing"), "got: {}", reply);
    assert_eq!(
        balance_of(&w, "alice").await,
        Amount::from_naira(10_000 - 2030).unwrap()
    );

    // The provider eventually reports success; the worker confirms
    let unsettled = w
        .ledger
        .list_unsettled(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(unsettled.len(), 1);
    w.provider
        .set_status(&unsettled[0].idempotency_key, DisburseStatus::Success);

    let stats = w.settlement.run_once().await.unwrap();
    assert_eq!(stats.confirmed, 1);

    let tx = w
        .ledger
        .get_transaction(unsettled[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TxStatus::Completed);
    // Balance unchanged by settlement; the debit was already applied
    assert_eq!(
        balance_of(&w, "alice").await,
        Amount::from_naira(10_000 - 2030).unwrap()
    );
}

#[tokio::test]
async fn provider_outage_then_decline_refunds_via_settlement() {
    let w = world();
    let account = onboard(&w, "alice").await;
    w.provider.add_account("0123456789", "058", "ADA OBI");
    let body = format!(
        r#"{{"reference":"dep-1","account_number":"{}","amount_kobo":1000000}}"#,
        account
    );
    webhook(&w, &body, WEBHOOK_SECRET).await;

    w.provider.script_disburse(Err(ProviderError::Timeout));
    w.provider.script_disburse(Err(ProviderError::Timeout));
    chat(&w, "alice", "send 2k to 0123456789 gtbank").await;
    chat(&w, "alice", "yes").await;
    chat(&w, "alice", "1234").await;

    let unsettled = w
        .ledger
        .list_unsettled(chrono::Duration::zero())
        .await
        .unwrap();
    w.provider.set_status(
        &unsettled[0].idempotency_key,
        DisburseStatus::Declined("no such account".into()),
    );

    let stats = w.settlement.run_once().await.unwrap();
    assert_eq!(stats.reversed, 1);

    // Refunded in full, user told
    assert_eq!(balance_of(&w, "alice").await, Amount::from_naira(10_000).unwrap());
    assert_eq!(w.notifier.alerts().len(), 1);
    // No profit from a reversed transfer
    assert_eq!(w.profit.summarize(None, None).await.unwrap().count, 0);
}

#[tokio::test]
async fn ledger_audit_holds_after_mixed_activity() {
    let w = world();
    let account = onboard(&w, "alice").await;
    w.provider.add_account("0123456789", "058", "ADA OBI");

    let body = format!(
        r#"{{"reference":"dep-1","account_number":"{}","amount_kobo":2000000}}"#,
        account
    );
    webhook(&w, &body, WEBHOOK_SECRET).await;

    // Completed transfer
    chat(&w, "alice", "send 2k to 0123456789 gtbank").await;
    chat(&w, "alice", "yes").await;
    chat(&w, "alice", "1234").await;
    chat(&w, "alice", "no").await; // decline the save offer

    // Declined transfer (refunded)
    w.provider
        .script_disburse(Ok(DisburseStatus::Declined("blocked".into())));
    chat(&w, "alice", "send 1k to 0123456789 gtbank").await;
    chat(&w, "alice", "yes").await;
    chat(&w, "alice", "1234").await;

    // Second deposit
    let body2 = format!(
        r#"{{"reference":"dep-2","account_number":"{}","amount_kobo":300000}}"#,
        account
    );
    webhook(&w, &body2, WEBHOOK_SECRET).await;

    // balance == sum of signed transaction amounts
    let user = w.ledger.find_user_by_chat("alice").await.unwrap().unwrap();
    w.ledger.audit_balance(user.id).await.unwrap();
    assert_eq!(
        user.balance,
        Amount::from_naira(20_000 - 2030 + 3000).unwrap()
    );
}

#[tokio::test]
async fn pin_lockout_blocks_transfer() {
    let w = world();
    let account = onboard(&w, "alice").await;
    w.provider.add_account("0123456789", "058", "ADA OBI");
    let body = format!(
        r#"{{"reference":"dep-1","account_number":"{}","amount_kobo":1000000}}"#,
        account
    );
    webhook(&w, &body, WEBHOOK_SECRET).await;

    chat(&w, "alice", "send 2k to 0123456789 gtbank").await;
    chat(&w, "alice", "yes").await;
    chat(&w, "alice", "1111").await;
    chat(&w, "alice", "2222").await;
    let locked = chat(&w, "alice", "3333").await;
    assert!(locked.contains("locked"), "got: {}", locked);

    // Correct PIN refused while locked; nothing moved
    let still = chat(&w, "alice", "1234").await;
    assert!(still.contains("locked"), "got: {}", still);
    assert_eq!(balance_of(&w, "alice").await, Amount::from_naira(10_000).unwrap());
    assert_eq!(w.provider.disburse_count(), 0);
}

#[tokio::test]
async fn two_users_transfer_independently() {
    let w = world();
    let acct_a = onboard(&w, "alice").await;
    let acct_b = onboard(&w, "bob").await;
    w.provider.add_account("0123456789", "058", "ADA OBI");

    for (reference, account) in [("dep-a", &acct_a), ("dep-b", &acct_b)] {
        let body = format!(
            r#"{{"reference":"{}","account_number":"{}","amount_kobo":1000000}}"#,
            reference, account
        );
        webhook(&w, &body, WEBHOOK_SECRET).await;
    }

    for chat_id in ["alice", "bob"] {
        chat(&w, chat_id, "send 2k to 0123456789 gtbank").await;
        chat(&w, chat_id, "yes").await;
        let done = chat(&w, chat_id, "1234").await;
        assert!(done.contains("Done!"), "{}: {}", chat_id, done);
    }

    assert_eq!(w.provider.disburse_count(), 2);
    for chat_id in ["alice", "bob"] {
        assert_eq!(
            balance_of(&w, chat_id).await,
            Amount::from_naira(10_000 - 2030).unwrap()
        );
    }
}
