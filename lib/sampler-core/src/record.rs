use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::span::SpanGroup;

/// Per-policy or final decision state. `SecondChance` is transient: it is
/// always resolved to `Sampled` or `NotSampled` before a tick returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Sampled,
    NotSampled,
    SecondChance,
}

impl Decision {
    pub fn is_terminal(self) -> bool {
        matches!(self, Decision::Sampled | Decision::NotSampled)
    }
}

/// Per-trace state held by the trace store while a trace is in flight.
///
/// `span_count` and `selected_by_probabilistic_filter` are atomics so Ingest
/// can update them without taking the record's lock. `received_batches` and
/// `per_policy_decision` share the lock: the append to `received_batches`
/// and the read of the per-policy decisions happen atomically with respect
/// to each other, so a decision cannot transition from Pending to terminal
/// between the read and the append.
pub struct TraceRecord {
    pub arrival_time: Instant,
    decision_time: Mutex<Option<Instant>>,
    span_count: AtomicU64,
    pub selected_by_probabilistic_filter: AtomicBool,
    inner: Mutex<TraceRecordInner>,
}

struct TraceRecordInner {
    received_batches: Vec<SpanGroup>,
    per_policy_decision: Vec<Decision>,
    final_decision: Decision,
}

impl TraceRecord {
    pub fn new(arrival_time: Instant, num_policies: usize) -> Self {
        Self {
            arrival_time,
            decision_time: Mutex::new(None),
            span_count: AtomicU64::new(0),
            selected_by_probabilistic_filter: AtomicBool::new(false),
            inner: Mutex::new(TraceRecordInner {
                received_batches: Vec::new(),
                per_policy_decision: vec![Decision::Pending; num_policies],
                final_decision: Decision::Pending,
            }),
        }
    }

    pub fn add_spans(&self, count: u64) -> u64 {
        self.span_count.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn span_count(&self) -> u64 {
        self.span_count.load(Ordering::Relaxed)
    }

    pub fn decision_time(&self) -> Option<Instant> {
        *self.decision_time.lock().unwrap()
    }

    pub fn set_decision_time(&self, now: Instant) {
        *self.decision_time.lock().unwrap() = Some(now);
    }

    /// While the trace's final decision is still non-terminal — `Pending`
    /// *or* the decision loop's transient `SecondChance` — this call appends
    /// `group` to `received_batches` (at most once per Ingest call) and
    /// reports `Pending`; an existing, already-queued pending batch is never
    /// rewritten. `SecondChance` has to be treated the same as `Pending`
    /// here: it is set during the decision loop's first pass and only
    /// resolved to `Sampled`/`NotSampled` in the second, so a concurrent
    /// ingest landing in that window must still see the trace as undecided
    /// or the late span is silently lost. Once a terminal decision has been
    /// rendered, the span group is handed back untouched along with a
    /// snapshot of the per-policy decisions so the caller can react to the
    /// already-fixed outcome. Read and append happen under one lock
    /// acquisition, so the decision cannot transition between the two.
    pub fn observe(&self, group: SpanGroup) -> IngestObservation {
        let mut inner = self.inner.lock().unwrap();
        if inner.final_decision.is_terminal() {
            IngestObservation::Decided {
                per_policy: inner.per_policy_decision.clone(),
                group,
            }
        } else {
            inner.received_batches.push(group);
            IngestObservation::Pending
        }
    }

    pub fn policy_decision(&self, index: usize) -> Decision {
        self.inner.lock().unwrap().per_policy_decision[index]
    }

    pub fn set_policy_decision(&self, index: usize, decision: Decision) {
        self.inner.lock().unwrap().per_policy_decision[index] = decision;
    }

    pub fn final_decision(&self) -> Decision {
        self.inner.lock().unwrap().final_decision
    }

    pub fn set_final_decision(&self, decision: Decision) {
        self.inner.lock().unwrap().final_decision = decision;
    }

    /// Clones the accumulated span groups without detaching them, for the
    /// decision loop's first pass to evaluate policies against.
    pub fn snapshot_received_batches(&self) -> Vec<SpanGroup> {
        self.inner.lock().unwrap().received_batches.clone()
    }

    /// Detaches the accumulated span groups, leaving an empty buffer behind.
    /// Called exactly once, from the decision loop's second pass, under the
    /// record's lock so the record never owns those spans again afterwards.
    pub fn take_received_batches(&self) -> Vec<SpanGroup> {
        std::mem::take(&mut self.inner.lock().unwrap().received_batches)
    }

    pub fn received_batches_is_empty(&self) -> bool {
        self.inner.lock().unwrap().received_batches.is_empty()
    }
}

pub enum IngestObservation {
    Pending,
    Decided {
        per_policy: Vec<Decision>,
        group: SpanGroup,
    },
}
