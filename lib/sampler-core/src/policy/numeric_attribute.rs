use crate::id::TraceId;
use crate::record::Decision;
use crate::span::SpanGroup;

use super::{Policy, PolicyError};

pub struct NumericAttribute {
    name: String,
    key: String,
    min: i64,
    max: i64,
}

impl NumericAttribute {
    pub fn new(name: String, key: String, min: i64, max: i64) -> Self {
        Self { name, key, min, max }
    }
}

impl Policy for NumericAttribute {
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
                .and_then(|value| value.as_int())
                .is_some_and(|value| value >= self.min && value <= self.max)
        });
        Ok(if matched {
            Decision::Sampled
        } else {
            Decision::NotSampled
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{AttributeValue, Span};
    use std::collections::HashMap;

    fn span_with_status(status: i64) -> Span {
        let mut attributes = HashMap::new();
        attributes.insert("http.status".to_string(), AttributeValue::Int(status));
        Span {
            trace_id: TraceId::from_bytes(&[1u8; 16]).0,
            operation_name: "GET /".into(),
            is_root: true,
            start_unix_nanos: 0,
            end_unix_nanos: 1,
            attributes,
        }
    }

    #[test]
    fn matches_value_in_range() {
        let policy = NumericAttribute::new("http-5xx".into(), "http.status".into(), 400, 599);
        let id = TraceId::from_bytes(&[1u8; 16]).0;
        let batches = vec![vec![span_with_status(500)]];
        assert_eq!(
            policy.evaluate(id, &batches, 0).unwrap(),
            Decision::Sampled
        );
    }

    #[test]
    fn rejects_value_out_of_range() {
        let policy = NumericAttribute::new("http-5xx".into(), "http.status".into(), 400, 599);
        let id = TraceId::from_bytes(&[1u8; 16]).0;
        let batches = vec![vec![span_with_status(200)]];
        assert_eq!(
            policy.evaluate(id, &batches, 0).unwrap(),
            Decision::NotSampled
        );
    }
}
