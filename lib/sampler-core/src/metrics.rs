use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

mod labels {
    pub const POLICY: &str = "policy";
    pub const STATUS: &str = "status";
}

mod values {
    #[derive(Clone, Copy, Debug, strum::IntoStaticStr)]
    pub enum SampleStatus {
        #[strum(serialize = "sampled")]
        Sampled,
        #[strum(serialize = "second_chance")]
        SecondChance,
        #[strum(serialize = "rate_exceeded")]
        RateExceeded,
    }

    impl SampleStatus {
        pub fn as_str(self) -> &'static str {
            self.into()
        }
    }
}

pub use values::SampleStatus;

mod names {
    pub const TRACES_SAMPLED_TOTAL: &str = "sampler.traces.sampled";
    pub const POLICY_DECISION_DURATION: &str = "sampler.policy.decision.duration";
    pub const DECISION_LOOP_DURATION: &str = "sampler.decision_loop.duration";
    pub const DROPPED_TOO_EARLY_TOTAL: &str = "sampler.traces.dropped_too_early";
    pub const POLICY_ERRORS_TOTAL: &str = "sampler.policy.errors";
    pub const LATE_SPAN_ARRIVAL_AGE: &str = "sampler.late_span.arrival_age";
    pub const TRACE_REMOVAL_AGE: &str = "sampler.trace.removal_age";
    pub const LIVE_TRACES: &str = "sampler.traces.live";
}

/// Best-effort instrumentation for the decision engine. Every instrument is
/// `Option`-gated on whether a `Meter` was supplied at construction, so a
/// disabled-metrics engine pays no cost beyond a handful of `None` checks and
/// never blocks the decision loop.
#[derive(Clone)]
pub struct CascadeMetrics {
    traces_sampled_total: Option<Counter<u64>>,
    policy_decision_duration: Option<Histogram<f64>>,
    decision_loop_duration: Option<Histogram<f64>>,
    dropped_too_early_total: Option<Counter<u64>>,
    policy_errors_total: Option<Counter<u64>>,
    late_span_arrival_age: Option<Histogram<f64>>,
    trace_removal_age: Option<Histogram<f64>>,
    live_traces: Arc<AtomicU64>,
}

impl CascadeMetrics {
    pub fn new(meter: Option<&Meter>) -> Self {
        Self {
            traces_sampled_total: meter.map(|m| {
                m.u64_counter(names::TRACES_SAMPLED_TOTAL)
                    .with_description("Traces evaluated by the decision loop, tagged by policy and status")
                    .build()
            }),
            policy_decision_duration: meter.map(|m| {
                m.f64_histogram(names::POLICY_DECISION_DURATION)
                    .with_unit("s")
                    .with_description("Time spent evaluating a single policy against a trace")
                    .build()
            }),
            decision_loop_duration: meter.map(|m| {
                m.f64_histogram(names::DECISION_LOOP_DURATION)
                    .with_unit("s")
                    .with_description("Wall-clock duration of one decision loop tick")
                    .build()
            }),
            dropped_too_early_total: meter.map(|m| {
                m.u64_counter(names::DROPPED_TOO_EARLY_TOTAL)
                    .with_description("Ids due for a decision whose trace record was already evicted")
                    .build()
            }),
            policy_errors_total: meter.map(|m| {
                m.u64_counter(names::POLICY_ERRORS_TOTAL)
                    .with_description("Policy evaluation errors, recovered as NotSampled")
                    .build()
            }),
            late_span_arrival_age: meter.map(|m| {
                m.f64_histogram(names::LATE_SPAN_ARRIVAL_AGE)
                    .with_unit("s")
                    .with_description("Age of a late-arriving span relative to its trace's decision time")
                    .build()
            }),
            trace_removal_age: meter.map(|m| {
                m.f64_histogram(names::TRACE_REMOVAL_AGE)
                    .with_unit("s")
                    .with_description("Age of a trace record at the moment it was evicted or decided")
                    .build()
            }),
            live_traces: {
                let live_traces = Arc::new(AtomicU64::new(0));
                if let Some(m) = meter {
                    let observed = live_traces.clone();
                    m.u64_observable_gauge(names::LIVE_TRACES)
                        .with_description("Live trace records currently held by the trace store")
                        .with_callback(move |observer| {
                            observer.observe(observed.load(Ordering::Relaxed), &[]);
                        })
                        .build();
                }
                live_traces
            },
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn record_decision(&self, policy: &str, status: SampleStatus) {
        if let Some(counter) = &self.traces_sampled_total {
            counter.add(1, &[KeyValue::new(labels::POLICY, policy.to_string()), KeyValue::new(labels::STATUS, status.as_str())]);
        }
    }

    pub fn record_policy_decision_duration(&self, policy: &str, duration: Duration) {
        if let Some(histogram) = &self.policy_decision_duration {
            histogram.record(duration.as_secs_f64(), &[KeyValue::new(labels::POLICY, policy.to_string())]);
        }
    }

    pub fn record_decision_loop_duration(&self, duration: Duration) {
        if let Some(histogram) = &self.decision_loop_duration {
            histogram.record(duration.as_secs_f64(), &[]);
        }
    }

    pub fn record_dropped_too_early(&self) {
        if let Some(counter) = &self.dropped_too_early_total {
            counter.add(1, &[]);
        }
    }

    pub fn record_policy_error(&self, policy: &str) {
        if let Some(counter) = &self.policy_errors_total {
            counter.add(1, &[KeyValue::new(labels::POLICY, policy.to_string())]);
        }
    }

    pub fn record_late_span_arrival_age(&self, age: Duration) {
        if let Some(histogram) = &self.late_span_arrival_age {
            histogram.record(age.as_secs_f64(), &[]);
        }
    }

    pub fn record_trace_removal_age(&self, age: Duration) {
        if let Some(histogram) = &self.trace_removal_age {
            histogram.record(age.as_secs_f64(), &[]);
        }
    }

    pub fn set_live_traces(&self, count: u64) {
        self.live_traces.store(count, Ordering::Relaxed);
    }
}
