mod always_sample;
mod cascading;
mod numeric_attribute;
mod properties;
mod rate_limiting;
mod string_attribute;

pub use always_sample::AlwaysSample;
pub use cascading::Cascading;
pub use numeric_attribute::NumericAttribute;
pub use properties::PropertiesFilter;
pub use rate_limiting::RateLimiting;
pub use string_attribute::StringAttribute;

use sampler_config::policy::{PolicyConfig, PolicyConfigError, PolicyVariantConfig};
use thiserror::Error;

use crate::id::TraceId;
use crate::record::Decision;
use crate::span::SpanGroup;

/// A policy is called once per trace during the decision loop's first pass,
/// and again (as a notification, not a vote) whenever a span for an
/// already-decided trace arrives late. Implementations that carry their own
/// per-second budget (rate_limiting, cascading's sub-rules) use interior
/// mutability, since the decision loop holds the whole policy list behind a
/// shared reference.
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    /// `now_second` is the wall-clock second of the tick driving this
    /// evaluation, passed down so per-second budgets reset correctly without
    /// each policy reading the clock independently.
    fn evaluate(
        &self,
        trace_id: TraceId,
        batches: &[SpanGroup],
        now_second: i64,
    ) -> Result<Decision, PolicyError>;

    fn on_late_arriving_spans(&self, _previous_decision: Decision, _spans: &SpanGroup) {}
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy {policy} failed to evaluate: {message}")]
    Evaluation { policy: String, message: String },
}

/// Builds the ordered, named policy list from configuration. Construction
/// errors here are fatal — they are expected to have already
/// been caught by `PolicyConfig::validate`, but building from a matcher
/// carries its own regex compilation which can still fail.
pub fn build_policy(config: &PolicyConfig) -> Result<Box<dyn Policy>, PolicyConfigError> {
    let name = config.name.clone();
    match &config.variant {
        PolicyVariantConfig::AlwaysSample => Ok(Box::new(AlwaysSample::new(name))),
        PolicyVariantConfig::NumericAttribute(cfg) => Ok(Box::new(NumericAttribute::new(
            name, cfg.key.clone(), cfg.min, cfg.max,
        ))),
        PolicyVariantConfig::StringAttribute(cfg) => Ok(Box::new(StringAttribute::new(
            name,
            cfg.key.clone(),
            cfg.values.iter().cloned(),
        ))),
        PolicyVariantConfig::RateLimiting(cfg) => {
            Ok(Box::new(RateLimiting::new(name, cfg.spans_per_second)))
        }
        PolicyVariantConfig::Properties(cfg) => {
            Ok(Box::new(PropertiesFilter::new(name, cfg)?))
        }
        PolicyVariantConfig::Cascading(cfg) => Ok(Box::new(Cascading::new(name, cfg)?)),
    }
}

pub fn build_policies(configs: &[PolicyConfig]) -> Result<Vec<Box<dyn Policy>>, PolicyConfigError> {
    configs.iter().map(build_policy).collect()
}
