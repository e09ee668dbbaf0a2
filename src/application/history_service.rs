// History service - Use case for loading a recorded session into the store
use crate::application::history_repository::{HistoryError, HistoryRepository};
use crate::application::time_series_store::TimeSeriesStore;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    pub rejected: usize,
}

#[derive(Clone)]
pub struct HistoryService {
    repository: Arc<dyn HistoryRepository>,
    store: Arc<Mutex<TimeSeriesStore>>,
}

impl HistoryService {
    pub fn new(repository: Arc<dyn HistoryRepository>, store: Arc<Mutex<TimeSeriesStore>>) -> Self {
        Self { repository, store }
    }

    pub async fn load_session(&self, session: &str) -> Result<LoadReport, HistoryError> {
        let batch = self.repository.fetch_samples(session).await?;
        let inserted = self.store.lock().insert(batch.samples);

        tracing::info!(
            "Loaded session {}: {} samples ({} rejected)",
            session,
            inserted,
            batch.rejected
        );
        Ok(LoadReport {
            inserted,
            rejected: batch.rejected,
        })
    }
}
