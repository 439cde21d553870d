/**
 * Routes Module
 * API route handlers
 */
pub mod analytics;
pub mod auth;
pub mod categories;
pub mod content;
pub mod health;
pub mod submissions;
pub mod upload;

use serde::{Deserialize, Serialize};

/// Shared error payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
        }
    }

    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
        }
    }
}

/// Shared success payload (deletes, status-only acknowledgements).
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}
