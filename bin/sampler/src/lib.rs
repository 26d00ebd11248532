pub mod background_tasks;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod span_source;
pub mod telemetry;
