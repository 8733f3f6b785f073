//! API response types

use serde::{Deserialize, Serialize};

/// Response for GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,

    /// Number of connected observers
    pub observers: usize,
}
