//! HTTP handlers.
//!
//! The chat transport service POSTs inbound messages to `/api/v1/chat`
//! and delivers whatever reply we return. The disbursement provider
//! POSTs deposit events to `/webhook/deposits`, signed with
//! HMAC-SHA512 over the raw body; the signature is checked before the
//! body is parsed.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::money::Amount;
use crate::reconciler::{self, DepositOutcome};

use super::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Uniform error response body.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "Handler failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            error: "internal error".to_string(),
        }),
    )
        .into_response()
}

// === Chat ===

#[derive(Deserialize)]
pub struct ChatRequest {
    pub chat_id: String,
    pub text: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    match state.engine.handle_message(&req.chat_id, &req.text).await {
        Ok(reply) => Json(ChatResponse { reply }).into_response(),
        Err(e) => internal_error(e),
    }
}

// === Deposit webhook ===

#[derive(Deserialize)]
pub struct DepositEvent {
    pub reference: String,
    pub account_number: String,
    pub amount_kobo: i64,
}

#[derive(Serialize)]
pub struct DepositResponse {
    pub status: &'static str,
}

pub async fn deposit_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !reconciler::verify_signature(&state.webhook_secret, &body, signature) {
        warn!("Deposit webhook with bad signature rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiError {
                error: "invalid signature".to_string(),
            }),
        )
            .into_response();
    }

    let event: DepositEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: format!("bad payload: {}", e),
                }),
            )
                .into_response()
        }
    };
    apply_deposit(&state, event).await
}

async fn apply_deposit(state: &AppState, event: DepositEvent) -> Response {
    let amount = match Amount::from_kobo(event.amount_kobo) {
        Ok(a) if !a.is_zero() => a,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: "amount must be positive".to_string(),
                }),
            )
                .into_response()
        }
    };

    match state
        .reconciler
        .apply_deposit(&event.reference, &event.account_number, amount)
        .await
    {
        Ok(DepositOutcome::Credited(_)) => Json(DepositResponse { status: "credited" }).into_response(),
        Ok(DepositOutcome::Duplicate(_)) => Json(DepositResponse { status: "duplicate" }).into_response(),
        // Always 200: the provider must not retry a deposit we can never
        // place. It is logged for manual review.
        Ok(DepositOutcome::UnknownAccount) => {
            Json(DepositResponse { status: "ignored" }).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// === Mock deposit (dev/test builds only) ===

#[cfg(feature = "mock-api")]
pub async fn mock_deposit(
    State(state): State<Arc<AppState>>,
    Json(event): Json<DepositEvent>,
) -> Response {
    apply_deposit(&state, event).await
}

// === Health ===

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("GIT_HASH"),
    })
}
