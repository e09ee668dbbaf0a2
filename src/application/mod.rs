// Application layer - State machines, use cases and the services that drive them
pub mod aggregation;
pub mod connection_manager;
pub mod connection_service;
pub mod history_repository;
pub mod history_service;
pub mod listeners;
pub mod live_pipeline;
pub mod playback;
pub mod playback_service;
pub mod query_cache;
pub mod queue_service;
pub mod sampling;
pub mod telemetry_queue;
pub mod time_series_store;
pub mod transport;
pub mod virtualization;
