//! Wire types for the gateway's JSON API

use layer_core::{AuditRecord, CompletionOutcome, Gate, Usage};
use serde::{Deserialize, Serialize};

/// `POST /v1/complete` success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    /// The model that actually answered
    pub model: String,
    pub usage: Usage,
}

impl From<CompletionOutcome> for CompletionResponse {
    fn from(outcome: CompletionOutcome) -> Self {
        Self {
            content: outcome.content,
            model: outcome.model_used,
            usage: outcome.usage,
        }
    }
}

/// Error body shared by every route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateList {
    pub gates: Vec<Gate>,
}

/// `GET /v1/requests` body: the caller's audit trail, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestList {
    pub requests: Vec<AuditRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub vendors: Vec<String>,
    pub models: usize,
}
