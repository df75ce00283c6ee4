//! Shared state for gateway handlers.

use std::sync::Arc;

use crate::conversation::ConversationEngine;
use crate::reconciler::CreditReconciler;

pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub reconciler: Arc<CreditReconciler>,
    pub webhook_secret: Vec<u8>,
}
