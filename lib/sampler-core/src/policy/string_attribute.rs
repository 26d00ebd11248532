use std::collections::HashSet;

use crate::id::TraceId;
use crate::record::Decision;
use crate::span::SpanGroup;

use super::{Policy, PolicyError};

pub struct StringAttribute {
    name: String,
    key: String,
    values: HashSet<String>,
}

impl StringAttribute {
    pub fn new(name: String, key: String, values: impl IntoIterator<Item = String>) -> Self {
        let values = values.into_iter().filter(|v| !v.is_empty()).collect();
        Self { name, key, values }
    }
}

impl Policy for StringAttribute {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        _trace_id: TraceId,
        batches: &[SpanGroup],
        _now_second: i64,
    ) -> Result<Decision, PolicyError> {
        let matched = batches.iter().flatten().any(|span| {
            span.attributes
                .get(&self.key)
                .and_then(|value| value.as_str())
                .is_some_and(|value| self.values.contains(value))
        });
        Ok(if matched {
            Decision::Sampled
        } else {
            Decision::NotSampled
        })
    }
}
