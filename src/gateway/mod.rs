pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/chat", post(handlers::chat))
        .route("/webhook/deposits", post(handlers::deposit_webhook));

    // [SECURITY] Mock API routes - only compiled when 'mock-api' feature is enabled.
    // Production builds MUST be compiled with `--no-default-features` to exclude this.
    #[cfg(feature = "mock-api")]
    let app = app.nest(
        "/internal/mock",
        Router::new().route("/deposit", post(handlers::mock_deposit)),
    );

    app.with_state(state)
}

/// Start the HTTP gateway server.
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!(addr, "Gateway listening");
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("FATAL: server error: {}", e);
        std::process::exit(1);
    }
}
