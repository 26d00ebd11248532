use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metrics export configuration. Disabled by default — the engine never
/// requires a `Meter` to function (see `sampler_core::metrics`).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Expose a Prometheus `/metrics` style text endpoint via
    /// `opentelemetry-prometheus`.
    #[serde(default)]
    pub prometheus: bool,
}

impl MetricsConfig {
    pub fn is_enabled(&self) -> bool {
        self.prometheus
    }
}
