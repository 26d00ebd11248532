use std::sync::Mutex;

use crate::arbiter::{Admission, RateArbiter};
use crate::id::TraceId;
use crate::record::Decision;
use crate::span::SpanGroup;

use super::{Policy, PolicyError};

/// Independent admission up to `spans_per_second`, across every trace this
/// policy sees — unrelated to the engine's global budget.
pub struct RateLimiting {
    name: String,
    arbiter: Mutex<RateArbiter>,
}

impl RateLimiting {
    pub fn new(name: String, spans_per_second: u64) -> Self {
        Self {
            name,
            arbiter: Mutex::new(RateArbiter::new(spans_per_second)),
        }
    }
}

impl Policy for RateLimiting {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        _trace_id: TraceId,
        batches: &[SpanGroup],
        now_second: i64,
    ) -> Result<Decision, PolicyError> {
        let span_count: u64 = batches.iter().map(|group| group.len() as u64).sum();
        let mut arbiter = self.arbiter.lock().unwrap();
        Ok(match arbiter.admit(now_second, span_count) {
            Admission::Sampled => Decision::Sampled,
            Admission::NotSampled => Decision::NotSampled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;
    use std::collections::HashMap;

    fn plain_span() -> Span {
        Span {
            trace_id: TraceId::from_bytes(&[1u8; 16]).0,
            operation_name: "op".into(),
            is_root: true,
            start_unix_nanos: 0,
            end_unix_nanos: 1,
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn admits_only_up_to_its_own_budget() {
        let policy = RateLimiting::new("rl".into(), 5);
        let id = TraceId::from_bytes(&[1u8; 16]).0;
        let batches = vec![(0..5).map(|_| plain_span()).collect()];
        assert_eq!(
            policy.evaluate(id, &batches, 0).unwrap(),
            Decision::Sampled
        );
        assert_eq!(
            policy.evaluate(id, &batches, 0).unwrap(),
            Decision::NotSampled
        );
    }
}
