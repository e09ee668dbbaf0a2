use crate::application::connection_manager::ConnectionConfig;
use crate::application::playback::PlaybackConfig;
use crate::application::telemetry_queue::QueueConfig;
use crate::application::time_series_store::DEFAULT_QUERY_CACHE_SIZE;
use crate::application::virtualization::SamplingConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub connection: ConnectionConfig,
    pub sampling: SamplingConfig,
    pub playback: PlaybackConfig,
    pub store: StoreConfig,
    pub history: HistoryConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub query_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
        }
    }
}

/// Historical source. Without a session nothing is loaded at startup.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub base_url: String,
    pub session: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openf1.org/v1".to_string(),
            session: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be in (0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
}

impl PipelineConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("queue.max_queue_size", self.queue.max_queue_size as u64),
            ("queue.throttle_ms", self.queue.throttle_ms),
            ("connection.batch_size", self.connection.batch_size as u64),
            ("connection.batch_flush_ms", self.connection.batch_flush_ms),
            (
                "connection.max_pending_messages",
                self.connection.max_pending_messages as u64,
            ),
            (
                "connection.reconnect_interval_ms",
                self.connection.reconnect_interval_ms,
            ),
            ("playback.frame_interval_ms", self.playback.frame_interval_ms),
            ("playback.tick_ms", self.playback.tick_ms),
            ("store.query_cache_size", self.store.query_cache_size as u64),
            (
                "sampling.max_visible_points",
                self.sampling.max_visible_points as u64,
            ),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }

        let unit = [
            ("queue.smoothing_factor", self.queue.smoothing_factor),
            ("queue.adaptive_threshold", self.queue.adaptive_threshold),
        ];
        for (field, value) in unit {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }

        Ok(())
    }
}

/// Load `config/pipeline.toml` (optional) overlaid with `PIPELINE__*` env vars.
pub fn load_pipeline_config() -> anyhow::Result<PipelineConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/pipeline").required(false))
        .add_source(
            config::Environment::with_prefix("PIPELINE")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let config: PipelineConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::aggregation::ProcessStrategy;

    fn from_toml(text: &str) -> PipelineConfig {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("valid config")
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.queue.max_queue_size, 1000);
        assert_eq!(config.connection.max_reconnect_attempts, 10);
        assert_eq!(config.playback.frame_interval_ms, 100);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = from_toml(
            r#"
            [queue]
            process_strategy = "adaptive"
            max_queue_size = 50

            [connection]
            url = "ws://timing.local/live"
            ping_interval_ms = 5000
            "#,
        );

        assert_eq!(config.queue.process_strategy, ProcessStrategy::Adaptive);
        assert_eq!(config.queue.max_queue_size, 50);
        assert_eq!(config.queue.throttle_ms, 100);
        assert_eq!(config.connection.url, "ws://timing.local/live");
        assert_eq!(config.connection.ping_interval_ms, Some(5000));
        assert_eq!(config.server.bind, "0.0.0.0:3000");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.queue.max_queue_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "queue.max_queue_size"
            })
        );

        let mut config = PipelineConfig::default();
        config.queue.smoothing_factor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfUnitRange {
                field: "queue.smoothing_factor",
                ..
            })
        ));
    }
}
