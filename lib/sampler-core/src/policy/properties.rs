use regex_automata::meta::Regex;

use sampler_config::policy::{PolicyConfigError, PropertiesConfig};

use crate::id::TraceId;
use crate::record::Decision;
use crate::span::SpanGroup;

use super::{Policy, PolicyError};

/// Matches iff every configured sub-condition holds.
/// Validation of the regex and the numeric bounds happens up front in
/// `sampler_config::policy::PolicyConfig::validate`; this constructor
/// re-validates defensively since it is the one place that actually compiles
/// the pattern into an automaton.
pub struct PropertiesFilter {
    name: String,
    name_pattern: Option<Regex>,
    min_duration_micros: Option<i64>,
    min_number_of_spans: Option<usize>,
}

impl PropertiesFilter {
    pub fn new(name: String, config: &PropertiesConfig) -> Result<Self, PolicyConfigError> {
        let name_pattern = config
            .name_pattern
            .as_ref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|_| PolicyConfigError::InvalidRegex(pattern.clone()))
            })
            .transpose()?;

        Ok(Self {
            name,
            name_pattern,
            min_duration_micros: config.min_duration_micros,
            min_number_of_spans: config.min_number_of_spans,
        })
    }
}

impl Policy for PropertiesFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        _trace_id: TraceId,
        batches: &[SpanGroup],
        _now_second: i64,
    ) -> Result<Decision, PolicyError> {
        let spans: Vec<_> = batches.iter().flatten().collect();

        if let Some(pattern) = &self.name_pattern {
            let root_matches = spans
                .iter()
                .filter(|span| span.is_root)
                .any(|span| pattern.is_match(span.operation_name.as_bytes()));
            if !root_matches {
                return Ok(Decision::NotSampled);
            }
        }

        if let Some(min_duration) = self.min_duration_micros {
            let (min_start, max_end) = spans.iter().fold(
                (u64::MAX, 0u64),
                |(min_start, max_end), span| {
                    (
                        min_start.min(span.start_unix_nanos),
                        max_end.max(span.end_unix_nanos),
                    )
                },
            );
            let duration_micros = if spans.is_empty() {
                0
            } else {
                max_end.saturating_sub(min_start) / 1_000
            };
            if (duration_micros as i64) < min_duration {
                return Ok(Decision::NotSampled);
            }
        }

        if let Some(min_spans) = self.min_number_of_spans {
            if spans.len() < min_spans {
                return Ok(Decision::NotSampled);
            }
        }

        Ok(Decision::Sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;
    use std::collections::HashMap;

    fn root_span(name: &str, start: u64, end: u64) -> Span {
        Span {
            trace_id: TraceId::from_bytes(&[1u8; 16]).0,
            operation_name: name.to_string(),
            is_root: true,
            start_unix_nanos: start,
            end_unix_nanos: end,
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn all_configured_conditions_must_hold() {
        let config = PropertiesConfig {
            name_pattern: Some("^GET".to_string()),
            min_duration_micros: Some(1_000),
            min_number_of_spans: Some(2),
        };
        let filter = PropertiesFilter::new("slow-gets".into(), &config).unwrap();
        let id = TraceId::from_bytes(&[1u8; 16]).0;

        let batches = vec![vec![
            root_span("GET /checkout", 0, 2_000_000),
            root_span("child", 0, 1_000),
        ]];
        assert_eq!(
            filter.evaluate(id, &batches, 0).unwrap(),
            Decision::Sampled
        );

        let too_short = vec![vec![
            root_span("GET /checkout", 0, 500),
            root_span("child", 0, 1_000),
        ]];
        assert_eq!(
            filter.evaluate(id, &too_short, 0).unwrap(),
            Decision::NotSampled
        );
    }
}
