use std::sync::Mutex;

use rand::Rng;

use crate::arbiter::{Admission, RateArbiter};
use crate::id::TraceId;
use crate::record::Decision;
use crate::span::SpanGroup;

/// Optional policy evaluated before every other policy in the decision
/// loop's first pass. Its budget is `floor(global_spans_per_second *
/// ratio)`, tracked with its own `RateArbiter` independent of the engine's
/// global one. Admission is fair-random: a trace this filter sees is offered
/// a coin flip weighted by `ratio` before the budget check, so that under
/// sustained overload it does not simply favor whichever traces arrive
/// first within the second.
pub struct ProbabilisticFilter {
    ratio: f64,
    arbiter: Mutex<RateArbiter>,
}

impl ProbabilisticFilter {
    pub fn new(global_spans_per_second: u64, ratio: f64) -> Self {
        let budget = (global_spans_per_second as f64 * ratio).floor() as u64;
        Self {
            ratio,
            arbiter: Mutex::new(RateArbiter::new(budget)),
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn budget(&self) -> u64 {
        self.arbiter.lock().unwrap().budget()
    }

    /// Evaluates and, on admission, updates its own budget. `now_second`
    /// must match the tick driving the evaluation.
    pub fn evaluate(
        &self,
        _trace_id: TraceId,
        batches: &[SpanGroup],
        now_second: i64,
    ) -> Decision {
        let span_count: u64 = batches.iter().map(|group| group.len() as u64).sum();

        if !rand::rng().random_bool(self.ratio.clamp(0.0, 1.0)) {
            return Decision::NotSampled;
        }

        let mut arbiter = self.arbiter.lock().unwrap();
        match arbiter.admit(now_second, span_count) {
            Admission::Sampled => Decision::Sampled,
            Admission::NotSampled => Decision::NotSampled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_the_floor_of_ratio_times_global_budget() {
        let filter = ProbabilisticFilter::new(10, 0.35);
        assert_eq!(filter.budget(), 3);
    }

    #[test]
    fn ratio_of_one_never_coin_flips_away_admission() {
        let filter = ProbabilisticFilter::new(10, 1.0);
        let id = TraceId::from_bytes(&[1u8; 16]).0;
        assert_eq!(filter.evaluate(id, &[], 0), Decision::Sampled);
    }
}
