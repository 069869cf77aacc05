//! Chat handler.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::service::{ReplyStatus, ERROR_REPLY};
use crate::truncate_str;
use crate::types::{ChatHistory, GenerationRequest};

/// Category sent to clients in place of the internal error detail
pub const INFERENCE_FAILED: &str = "inference_failed";
/// Category for bodies that are not a valid chat request
pub const INVALID_REQUEST: &str = "invalid_request";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: ChatHistory,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle a chat message. Always answers with a reply string and a status.
pub async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> (StatusCode, Json<ChatResponse>) {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            tracing::warn!("Rejected chat request: {}", rejection.body_text());
            return (
                rejection.status(),
                Json(ChatResponse {
                    response: ERROR_REPLY.to_string(),
                    status: ReplyStatus::Error,
                    error: Some(INVALID_REQUEST.to_string()),
                }),
            );
        }
    };

    tracing::info!("Received message: {}", truncate_str(&req.message, 50));

    let reply = state
        .service
        .handle(GenerationRequest::new(req.message, req.history))
        .await;

    let (code, error) = match reply.status {
        ReplyStatus::Error => (StatusCode::INTERNAL_SERVER_ERROR, Some(INFERENCE_FAILED.to_string())),
        ReplyStatus::Success | ReplyStatus::Timeout => (StatusCode::OK, None),
    };

    (
        code,
        Json(ChatResponse {
            response: reply.text,
            status: reply.status,
            error,
        }),
    )
}
