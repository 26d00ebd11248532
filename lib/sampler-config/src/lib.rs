pub mod log;
pub mod metrics;
pub mod policy;

use config::{Config, File, FileFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::log::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::policy::PolicyConfig;

/// Top-level configuration for the cascading tail-based trace sampler.
///
/// Mirrors the `decision_wait` / `num_traces` / `expected_new_traces_per_sec` /
/// `spans_per_second` / `probabilistic_filtering_ratio` / `policies` table.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// How long to hold a trace before evaluating it. Determines the id
    /// batcher's depth (one bucket per whole second).
    #[serde(default = "default_decision_wait", with = "humantime_serde")]
    #[schemars(with = "String")]
    pub decision_wait: std::time::Duration,

    /// Ceiling on the number of live trace records held in memory at once.
    #[serde(default = "default_num_traces")]
    pub num_traces: usize,

    /// Hint used to pre-size internal batcher slots. Purely advisory.
    #[serde(default)]
    pub expected_new_traces_per_sec: usize,

    /// Global admission budget, in spans, shared across all policies and the
    /// second-chance pass, per one-second window.
    pub spans_per_second: u64,

    /// Fraction of `spans_per_second` reserved for the probabilistic
    /// pre-filter. Absent or zero disables the pre-filter.
    #[serde(default)]
    pub probabilistic_filtering_ratio: Option<f64>,

    /// Ordered list of policies. Order is significant: the first policy to
    /// return `Sampled` during a tick wins attribution.
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,

    #[serde(default)]
    pub log: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_decision_wait() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

fn default_num_traces() -> usize {
    50_000
}

impl EngineConfig {
    /// Construction-time validation. Refuses to start the engine on any
    /// configuration error; runtime errors are handled separately by the
    /// engine itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ratio) = self.probabilistic_filtering_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::InvalidProbabilisticRatio(ratio));
            }
        }
        for policy in &self.policies {
            policy.validate().map_err(|source| ConfigError::Policy {
                name: policy.name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to get the current directory: {0}")]
    CurrentDir(std::io::Error),
    #[error("probabilistic_filtering_ratio must be within (0, 1], got {0}")]
    InvalidProbabilisticRatio(f64),
    #[error("policy '{name}': {source}")]
    Policy {
        name: String,
        source: policy::PolicyConfigError,
    },
}

static DEFAULT_FILE_NAMES: &[&str] = &[
    "sampler.config.yaml",
    "sampler.config.yml",
    "sampler.config.json",
    "sampler.config.json5",
];

/// Loads configuration from an explicit path, or the first of
/// [`DEFAULT_FILE_NAMES`] found in the current directory.
pub fn load_config(override_config_path: Option<String>) -> Result<EngineConfig, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = override_config_path {
        builder = builder.add_source(File::with_name(&path).required(true));
    } else {
        for name in DEFAULT_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    let engine_config = builder.build()?.try_deserialize::<EngineConfig>()?;
    engine_config.validate()?;
    Ok(engine_config)
}

/// Parses configuration from an in-memory YAML document, for tests and
/// embedders that don't want to touch the filesystem.
pub fn parse_yaml_config(raw: &str) -> Result<EngineConfig, ConfigError> {
    let engine_config = Config::builder()
        .add_source(File::from_str(raw, FileFormat::Yaml))
        .build()?
        .try_deserialize::<EngineConfig>()?;
    engine_config.validate()?;
    Ok(engine_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_yaml_config("spans_per_second: 500").unwrap();
        assert_eq!(config.num_traces, 50_000);
        assert_eq!(config.decision_wait, std::time::Duration::from_secs(30));
        assert!(config.policies.is_empty());
        assert!(!config.log.json);
    }

    #[test]
    fn full_policy_list_parses() {
        let raw = r#"
spans_per_second: 1000
decision_wait: 10s
probabilistic_filtering_ratio: 0.1
policies:
  - name: always
    kind: always_sample
  - name: errors
    kind: numeric_attribute
    key: http.status
    min: 500
    max: 599
  - name: cascade
    kind: cascading
    rules:
      - spans_per_second: 5
        kind: always_sample
      - spans_per_second: -1
        kind: always_sample
"#;
        let config = parse_yaml_config(raw).unwrap();
        assert_eq!(config.decision_wait, std::time::Duration::from_secs(10));
        assert_eq!(config.policies.len(), 3);
        assert_eq!(config.policies[0].name, "always");
    }

    #[test]
    fn out_of_range_probabilistic_ratio_is_rejected() {
        let raw = "spans_per_second: 100\nprobabilistic_filtering_ratio: 1.5";
        assert!(matches!(
            parse_yaml_config(raw),
            Err(ConfigError::InvalidProbabilisticRatio(_))
        ));
    }

    #[test]
    fn invalid_policy_regex_is_rejected_at_validation() {
        let raw = r#"
spans_per_second: 100
policies:
  - name: slow
    kind: properties
    name_pattern: "("
"#;
        assert!(matches!(
            parse_yaml_config(raw),
            Err(ConfigError::Policy { .. })
        ));
    }
}
