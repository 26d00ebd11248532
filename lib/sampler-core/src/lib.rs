pub mod arbiter;
pub mod batcher;
pub mod consumer;
pub mod engine;
pub mod id;
pub mod metrics;
pub mod policy;
pub mod probabilistic;
pub mod record;
pub mod span;
pub mod store;

pub use consumer::TraceConsumer;
pub use engine::Engine;
pub use id::TraceId;
pub use metrics::CascadeMetrics;
pub use span::{AttributeValue, RawSpan, SampledTrace, Span, SpanGroup};
