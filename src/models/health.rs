use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness or readiness report of the relay
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    /// Open rooms, only filled in by the readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<usize>,
}

impl HealthResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            rooms: None,
        }
    }
}
