use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single entry in the `policies` list: a name (used for metrics
/// attribution and error messages) plus exactly one variant configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub name: String,
    #[serde(flatten)]
    pub variant: PolicyVariantConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyVariantConfig {
    AlwaysSample,
    NumericAttribute(NumericAttributeConfig),
    StringAttribute(StringAttributeConfig),
    RateLimiting(RateLimitingConfig),
    Cascading(CascadingConfig),
    Properties(PropertiesConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NumericAttributeConfig {
    pub key: String,
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StringAttributeConfig {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RateLimitingConfig {
    pub spans_per_second: u64,
}

/// A sub-rule of a `cascading` policy: its own per-second budget plus a
/// nested matcher. `spans_per_second = -1` means "take whatever is left of
/// the global budget" (the sub-rule never wins on its own local cap).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CascadingRuleConfig {
    pub spans_per_second: i64,
    #[serde(flatten)]
    pub matcher: PolicyVariantConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CascadingConfig {
    pub rules: Vec<CascadingRuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PropertiesConfig {
    /// Regex matched against the root span's operation name.
    #[serde(default)]
    pub name_pattern: Option<String>,
    /// Minimum wall-clock trace duration, in microseconds.
    #[serde(default)]
    pub min_duration_micros: Option<i64>,
    /// Minimum total span count.
    #[serde(default)]
    pub min_number_of_spans: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("invalid regex in name_pattern: {0}")]
    InvalidRegex(String),
    #[error("min_duration_micros must be >= 0, got {0}")]
    NegativeMinDuration(i64),
    #[error("min_number_of_spans must be >= 1, got {0}")]
    NonPositiveMinSpans(usize),
    #[error("rule #{index}: {source}")]
    Rule {
        index: usize,
        #[source]
        source: Box<PolicyConfigError>,
    },
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        self.variant.validate()
    }
}

impl PolicyVariantConfig {
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        match self {
            PolicyVariantConfig::AlwaysSample
            | PolicyVariantConfig::NumericAttribute(_)
            | PolicyVariantConfig::StringAttribute(_)
            | PolicyVariantConfig::RateLimiting(_) => Ok(()),
            PolicyVariantConfig::Properties(properties) => properties.validate(),
            PolicyVariantConfig::Cascading(cascading) => cascading.validate(),
        }
    }
}

impl PropertiesConfig {
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if let Some(pattern) = &self.name_pattern {
            regex_automata::meta::Regex::new(pattern)
                .map_err(|err| PolicyConfigError::InvalidRegex(err.to_string()))?;
        }
        if let Some(min_duration) = self.min_duration_micros {
            if min_duration < 0 {
                return Err(PolicyConfigError::NegativeMinDuration(min_duration));
            }
        }
        if let Some(min_spans) = self.min_number_of_spans {
            if min_spans < 1 {
                return Err(PolicyConfigError::NonPositiveMinSpans(min_spans));
            }
        }
        Ok(())
    }
}

impl CascadingConfig {
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        for (index, rule) in self.rules.iter().enumerate() {
            rule.matcher
                .validate()
                .map_err(|source| PolicyConfigError::Rule {
                    index,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_min_duration_is_rejected() {
        let config = PropertiesConfig {
            name_pattern: None,
            min_duration_micros: Some(-1),
            min_number_of_spans: None,
        };
        assert!(matches!(
            config.validate(),
            Err(PolicyConfigError::NegativeMinDuration(-1))
        ));
    }

    #[test]
    fn zero_min_spans_is_rejected() {
        let config = PropertiesConfig {
            name_pattern: None,
            min_duration_micros: None,
            min_number_of_spans: Some(0),
        };
        assert!(matches!(
            config.validate(),
            Err(PolicyConfigError::NonPositiveMinSpans(0))
        ));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let config = PropertiesConfig {
            name_pattern: Some("(".to_string()),
            min_duration_micros: None,
            min_number_of_spans: None,
        };
        assert!(matches!(config.validate(), Err(PolicyConfigError::InvalidRegex(_))));
    }

    #[test]
    fn invalid_regex_in_a_cascading_sub_rule_is_attributed_to_its_index() {
        let config = CascadingConfig {
            rules: vec![
                CascadingRuleConfig {
                    spans_per_second: 1,
                    matcher: PolicyVariantConfig::AlwaysSample,
                },
                CascadingRuleConfig {
                    spans_per_second: -1,
                    matcher: PolicyVariantConfig::Properties(PropertiesConfig {
                        name_pattern: Some("(".to_string()),
                        min_duration_micros: None,
                        min_number_of_spans: None,
                    }),
                },
            ],
        };
        match config.validate() {
            Err(PolicyConfigError::Rule { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected Rule error, got {other:?}"),
        }
    }
}
