// Presentation layer - HTTP routes over the pipeline
pub mod app_state;
pub mod handlers;
