use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Logging configuration: silent-by-default filter plus a format toggle.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"info"` or
    /// `"sampler_core=debug,info"`.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit logs as JSON instead of a human-readable line format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}
