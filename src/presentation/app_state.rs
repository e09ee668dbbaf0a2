// Application state for HTTP handlers
use crate::application::live_pipeline::LivePipeline;
use crate::application::playback_service::PlaybackHandle;
use crate::application::time_series_store::TimeSeriesStore;
use crate::application::virtualization::SamplingConfig;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

/// Which store a history request reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreSource {
    /// The loaded recording, also the playback timeline.
    #[default]
    Session,
    /// Values published by the live telemetry queue.
    Live,
}

#[derive(Clone)]
pub struct AppState {
    pub live: LivePipeline,
    pub live_store: Arc<Mutex<TimeSeriesStore>>,
    pub session_store: Arc<Mutex<TimeSeriesStore>>,
    pub playback: PlaybackHandle,
    pub sampling: SamplingConfig,
}

impl AppState {
    pub fn store(&self, source: StoreSource) -> &Arc<Mutex<TimeSeriesStore>> {
        match source {
            StoreSource::Session => &self.session_store,
            StoreSource::Live => &self.live_store,
        }
    }
}
