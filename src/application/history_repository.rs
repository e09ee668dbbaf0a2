// Repository trait for historical session data
use crate::domain::telemetry::TelemetrySample;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Request(String),

    #[error("history source returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("history response could not be decoded: {0}")]
    Decode(String),
}

/// Samples loaded for one session, plus how many rows failed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryBatch {
    pub samples: Vec<TelemetrySample>,
    pub rejected: usize,
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Fetch every recorded car-data sample for a session.
    async fn fetch_samples(&self, session: &str) -> Result<HistoryBatch, HistoryError>;
}
