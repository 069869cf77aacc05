//! Health check handler.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::api::state::AppState;

/// Report model and accelerator status.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "model_loaded": state.service.model_state().is_loaded(),
        "accelerator_enabled": state.service.is_accelerated(),
        "model_type": state.model_type,
    }))
}
