//! Metric extraction
//!
//! The scheduler only knows how to ask for "one more reading". Everything
//! about logging in and locating the value on the source lives behind
//! [`MetricExtractor`].

use std::time::Duration;

use async_trait::async_trait;

pub mod http;

pub use http::HttpExtractor;

/// Failure of a single extraction
///
/// The scheduler treats both kinds the same way: report and keep polling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    /// The metric did not become available within the bounded wait
    #[error("timed out after {}s waiting for the metric", .0.as_secs_f64())]
    Timeout(Duration),

    /// Any other retrieval problem (navigation, session, missing element, ...)
    #[error("{0}")]
    Failure(String),
}

impl ExtractionError {
    pub fn failure(message: impl Into<String>) -> Self {
        ExtractionError::Failure(message.into())
    }
}

/// Source of raw metric text
#[async_trait]
pub trait MetricExtractor: Send + Sync {
    /// Run one extraction and return the raw text of the metric
    async fn extract(&self) -> Result<String, ExtractionError>;

    /// Release the underlying session
    ///
    /// Called once when the scheduler stops.
    async fn close(&self) {}
}
