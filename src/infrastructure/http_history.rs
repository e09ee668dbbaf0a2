// HTTP history repository implementation
use crate::application::history_repository::{HistoryBatch, HistoryError, HistoryRepository};
use crate::domain::frame::parse_telemetry_row;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct HttpHistoryRepository {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHistoryRepository {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn build_url(&self, session: &str) -> String {
        format!(
            "{}/car_data?session_key={}",
            self.base_url,
            urlencoding::encode(session)
        )
    }
}

/// Validate raw rows, skipping the ones that fail. Output is sorted by timestamp.
pub fn decode_rows(rows: &[serde_json::Value]) -> HistoryBatch {
    let mut batch = HistoryBatch::default();

    for row in rows {
        match parse_telemetry_row(row) {
            Ok(sample) => batch.samples.push(sample),
            Err(e) => {
                batch.rejected += 1;
                tracing::trace!("Skipping history row: {}", e);
            }
        }
    }

    batch.samples.sort_by_key(|s| s.timestamp);
    batch
}

#[async_trait]
impl HistoryRepository for HttpHistoryRepository {
    async fn fetch_samples(&self, session: &str) -> Result<HistoryBatch, HistoryError> {
        let url = self.build_url(session);
        tracing::debug!("Fetching history: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| HistoryError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Status { status, body });
        }

        let rows = response
            .json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| HistoryError::Decode(e.to_string()))?;

        let batch = decode_rows(&rows);
        if batch.rejected > 0 {
            tracing::warn!(
                "Session {}: skipped {} of {} history rows",
                session,
                batch.rejected,
                rows.len()
            );
        }
        Ok(batch)
    }
}
