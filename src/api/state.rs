//! Application state shared across handlers.

use std::sync::Arc;

use crate::service::ChatResponseService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatResponseService>,
    /// Model name reported by `/health`
    pub model_type: String,
}

impl AppState {
    pub fn new(service: ChatResponseService, model_type: impl Into<String>) -> Self {
        Self {
            service: Arc::new(service),
            model_type: model_type.into(),
        }
    }
}
