// Domain layer - Pure data types with no runtime dependencies
pub mod clock;
pub mod frame;
pub mod series;
pub mod telemetry;
