use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::arbiter::{Admission, RateArbiter};
use crate::batcher::IdBatcher;
use crate::consumer::TraceConsumer;
use crate::id::TraceId;
use crate::metrics::{CascadeMetrics, SampleStatus};
use crate::policy::Policy;
use crate::probabilistic::ProbabilisticFilter;
use crate::record::{Decision, IngestObservation, TraceRecord};
use crate::span::{RawSpan, SampledTrace, SpanGroup};
use crate::store::TraceStore;

/// One trace's outcome from the decision loop's first pass, carried into the
/// second pass for global-budget resolution.
struct PendingTrace {
    id: TraceId,
    record: Arc<TraceRecord>,
    final_decision: Decision,
    selected_by_probabilistic_filter: bool,
}

/// One trace's fully resolved outcome, ready for tick-wide aggregation and
/// emission.
struct ResolvedTrace {
    id: TraceId,
    record: Arc<TraceRecord>,
    final_decision: Decision,
    batches: Vec<SpanGroup>,
    span_count: u64,
    selected_by_probabilistic_filter: bool,
    /// Whether this trace actually competed for the global budget as a
    /// `SecondChance` in the first pass, as opposed to being `NotSampled`
    /// outright because no policy ever matched it.
    came_from_second_chance: bool,
}

/// Wires together every component: the trace store, id batcher, policy list
/// (with the probabilistic pre-filter evaluated first), rate arbiter,
/// decision loop and ingest path.
pub struct Engine {
    store: TraceStore,
    batcher: IdBatcher,
    policies: Vec<Box<dyn Policy>>,
    probabilistic_filter: Option<ProbabilisticFilter>,
    global_arbiter: AsyncMutex<RateArbiter>,
    consumer: Arc<dyn TraceConsumer>,
    metrics: CascadeMetrics,
}

impl Engine {
    pub fn new(
        num_traces: usize,
        batcher_depth: usize,
        spans_per_second: u64,
        probabilistic_filtering_ratio: Option<f64>,
        policies: Vec<Box<dyn Policy>>,
        consumer: Arc<dyn TraceConsumer>,
        metrics: CascadeMetrics,
    ) -> Self {
        let probabilistic_filter = probabilistic_filtering_ratio
            .filter(|ratio| *ratio > 0.0)
            .map(|ratio| ProbabilisticFilter::new(spans_per_second, ratio));

        Self {
            store: TraceStore::new(num_traces),
            batcher: IdBatcher::new(batcher_depth),
            policies,
            probabilistic_filter,
            global_arbiter: AsyncMutex::new(RateArbiter::new(spans_per_second)),
            consumer,
            metrics,
        }
    }

    pub fn live_traces(&self) -> usize {
        self.store.live_count()
    }

    /// External ingest boundary: takes a raw batch of spans as delivered by
    /// one inbound call, which may mix spans from several trace ids.
    /// Canonicalizes each span's trace id (zero-padding or truncating to 16
    /// bytes), logging a warning for any id that was not already exactly 16
    /// bytes — it is still keyed by its canonicalized bytes, never dropped —
    /// groups the batch by the resulting id (a mapping local to this call),
    /// and dispatches each group through `ingest`.
    pub async fn ingest_batch(&self, spans: Vec<RawSpan>) {
        let mut groups: HashMap<TraceId, SpanGroup> = HashMap::new();
        for raw in spans {
            let (trace_id, well_formed) = TraceId::from_bytes(&raw.trace_id);
            if !well_formed {
                warn!(
                    trace_id = %trace_id,
                    raw_len = raw.trace_id.len(),
                    "malformed trace id, keying by canonicalized bytes"
                );
            }
            groups.entry(trace_id).or_default().push(raw.into_span(trace_id));
        }

        for (trace_id, group) in groups {
            self.ingest(trace_id, group).await;
        }
    }

    /// Ingest path for a group already keyed by its canonical trace id.
    ///
    /// A trace whose decision has already been rendered has left the live
    /// map, so it is looked up in the bounded late-arrival cache first; only
    /// a genuinely new id falls through to `load_or_create`.
    pub async fn ingest(&self, trace_id: TraceId, group: SpanGroup) {
        if let Some(decided) = self.store.load_decided(&trace_id) {
            if let IngestObservation::Decided { per_policy, group } = decided.observe(group) {
                self.react_to_late_arrival(&decided, &per_policy, group).await;
            }
            return;
        }

        let span_count = group.len() as u64;
        let (record, was_new) = self.store.load_or_create(trace_id, self.num_policies()).await;
        record.add_spans(span_count);

        if was_new {
            self.batcher.add_to_current(trace_id);
        }

        match record.observe(group) {
            IngestObservation::Pending => {}
            IngestObservation::Decided { per_policy, group } => {
                self.react_to_late_arrival(&record, &per_policy, group).await;
            }
        }

        self.metrics.set_live_traces(self.store.live_count() as u64);
    }

    fn num_policies(&self) -> usize {
        self.policies.len() + self.probabilistic_filter.is_some() as usize
    }

    async fn react_to_late_arrival(
        &self,
        record: &TraceRecord,
        per_policy: &[Decision],
        group: SpanGroup,
    ) {
        if let Some(decision_time) = record.decision_time() {
            self.metrics
                .record_late_span_arrival_age(decision_time.elapsed());
        }

        match record.final_decision() {
            Decision::Sampled => {
                let policy_index = per_policy
                    .iter()
                    .position(|decision| *decision == Decision::Sampled);
                if let Some(index) = policy_index {
                    if let Some(policy) = self.policy_at(index) {
                        policy.on_late_arriving_spans(Decision::Sampled, &group);
                    }
                }
                self.consumer
                    .consume(SampledTrace { batches: vec![group] })
                    .await;
            }
            Decision::NotSampled => {
                let policy_index = per_policy
                    .iter()
                    .position(|decision| *decision == Decision::NotSampled);
                if let Some(index) = policy_index {
                    if let Some(policy) = self.policy_at(index) {
                        policy.on_late_arriving_spans(Decision::NotSampled, &group);
                    }
                }
            }
            Decision::Pending | Decision::SecondChance => {
                warn!("late arrival observed an untracked non-terminal final decision");
            }
        }
    }

    /// Index 0 is the probabilistic pre-filter when configured, the
    /// remainder map 1:1 onto `self.policies`.
    fn policy_at(&self, index: usize) -> Option<&dyn Policy> {
        if self.probabilistic_filter.is_some() {
            if index == 0 {
                return None;
            }
            self.policies.get(index - 1).map(|p| p.as_ref())
        } else {
            self.policies.get(index).map(|p| p.as_ref())
        }
    }

    /// Runs the periodic decision loop until `token` is cancelled. Modeled
    /// as a single long-running task blocking on a timer; cancellation is a
    /// separate signal, never relied on to unwind via panics or errors.
    pub async fn run_decision_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("decision loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let started = Instant::now();
        let now_second = now_unix_second();
        let batch = self.batcher.close_current_and_take_first();
        if batch.is_empty() {
            return;
        }

        let mut pending: Vec<PendingTrace> = Vec::with_capacity(batch.len());

        for id in &batch {
            let Some(record) = self.store.load(id) else {
                self.metrics.record_dropped_too_early();
                continue;
            };
            record.set_decision_time(Instant::now());

            let (provisional, selected_by_probabilistic_filter) =
                self.evaluate_policies(*id, &record, now_second).await;

            let final_decision = match provisional {
                Decision::Sampled => {
                    let span_count = record.span_count();
                    let mut arbiter = self.global_arbiter.lock().await;
                    match arbiter.admit(now_second, span_count) {
                        Admission::Sampled => Decision::Sampled,
                        Admission::NotSampled => Decision::SecondChance,
                    }
                }
                other => other,
            };
            record.set_final_decision(final_decision);

            if final_decision == Decision::SecondChance {
                let policy_name = self.attribution_for(
                    &record,
                    selected_by_probabilistic_filter,
                    Decision::SecondChance,
                );
                self.metrics
                    .record_decision(&policy_name, SampleStatus::SecondChance);
            }

            pending.push(PendingTrace {
                id: *id,
                record,
                final_decision,
                selected_by_probabilistic_filter,
            });
        }

        // Resolve every SecondChance trace against the same global arbiter,
        // collecting each trace's outcome without emitting anything yet —
        // the probabilistic-selection ratio annotation has to reflect spans
        // admitted across the whole tick, not one trace's own span count.
        let mut resolved: Vec<ResolvedTrace> = Vec::with_capacity(pending.len());
        for p in pending {
            let came_from_second_chance = p.final_decision == Decision::SecondChance;
            let final_decision = match p.final_decision {
                Decision::SecondChance => {
                    let span_count = p.record.span_count();
                    let mut arbiter = self.global_arbiter.lock().await;
                    let promoted = match arbiter.admit(now_second, span_count) {
                        Admission::Sampled => Decision::Sampled,
                        Admission::NotSampled => Decision::NotSampled,
                    };
                    drop(arbiter);
                    p.record.set_final_decision(promoted);
                    if promoted == Decision::Sampled {
                        self.promote_winning_policy_slot(&p.record);
                    }
                    promoted
                }
                other => other,
            };

            let batches = p.record.take_received_batches();
            let span_count: u64 = batches.iter().map(|g| g.len() as u64).sum();

            resolved.push(ResolvedTrace {
                id: p.id,
                record: p.record,
                final_decision,
                batches,
                span_count,
                selected_by_probabilistic_filter: p.selected_by_probabilistic_filter,
                came_from_second_chance,
            });
        }

        let total_tick_spans: u64 = resolved
            .iter()
            .filter(|r| r.final_decision == Decision::Sampled)
            .map(|r| r.span_count)
            .sum();
        let probabilistic_tick_spans: u64 = resolved
            .iter()
            .filter(|r| r.final_decision == Decision::Sampled && r.selected_by_probabilistic_filter)
            .map(|r| r.span_count)
            .sum();
        let probabilistic_ratio = if total_tick_spans == 0 {
            0.0
        } else {
            probabilistic_tick_spans as f64 / total_tick_spans as f64
        };

        for r in resolved {
            let policy_name =
                self.attribution_for(&r.record, r.selected_by_probabilistic_filter, Decision::Sampled);

            match r.final_decision {
                Decision::Sampled => {
                    self.metrics
                        .record_decision(&policy_name, SampleStatus::Sampled);

                    let mut sampled_trace = SampledTrace { batches: r.batches };
                    if r.selected_by_probabilistic_filter {
                        sampled_trace.annotate_sampling_probability(probabilistic_ratio);
                    }
                    self.consumer.consume(sampled_trace).await;
                }
                Decision::NotSampled => {
                    // Only a trace that actually competed for the global
                    // budget as a SecondChance lost to rate limiting; a
                    // trace no policy ever matched was never in contention.
                    if r.came_from_second_chance {
                        self.metrics
                            .record_decision(&policy_name, SampleStatus::RateExceeded);
                    }
                }
                Decision::Pending | Decision::SecondChance => {
                    warn!("trace left the second pass without a terminal decision");
                }
            }

            let removal_age = r.record.arrival_time.elapsed();
            self.store.move_to_decided(&r.id, r.record);
            self.metrics.record_trace_removal_age(removal_age);
        }

        self.metrics.set_live_traces(self.store.live_count() as u64);
        self.metrics.record_decision_loop_duration(started.elapsed());
    }

    /// Runs the policy list (with the probabilistic pre-filter at position 0
    /// if configured) against the trace's accumulated span groups, and
    /// records each policy's vote into the record's per-policy decision
    /// array. Returns the provisional decision.
    async fn evaluate_policies(
        &self,
        trace_id: TraceId,
        record: &TraceRecord,
        now_second: i64,
    ) -> (Decision, bool) {
        let batches = record.snapshot_received_batches();

        let mut provisional = Decision::NotSampled;
        let mut saw_second_chance = false;
        let mut selected_by_probabilistic_filter = false;
        let mut slot = 0usize;

        if let Some(filter) = &self.probabilistic_filter {
            let decision = filter.evaluate(trace_id, &batches, now_second);
            record.set_policy_decision(slot, decision);
            if decision == Decision::Sampled {
                provisional = Decision::Sampled;
                selected_by_probabilistic_filter = true;
            }
            slot += 1;
        }

        if provisional != Decision::Sampled {
            for policy in &self.policies {
                let started = Instant::now();
                let decision = match policy.evaluate(trace_id, &batches, now_second) {
                    Ok(decision) => decision,
                    Err(_) => {
                        self.metrics.record_policy_error(policy.name());
                        Decision::NotSampled
                    }
                };
                self.metrics
                    .record_policy_decision_duration(policy.name(), started.elapsed());
                record.set_policy_decision(slot, decision);

                match decision {
                    Decision::Sampled => {
                        provisional = Decision::Sampled;
                        slot += 1;
                        break;
                    }
                    Decision::SecondChance => saw_second_chance = true,
                    Decision::NotSampled | Decision::Pending => {}
                }
                slot += 1;
            }
        }

        if provisional != Decision::Sampled {
            provisional = if saw_second_chance {
                Decision::SecondChance
            } else {
                Decision::NotSampled
            };
        }

        record
            .selected_by_probabilistic_filter
            .store(selected_by_probabilistic_filter, Ordering::Relaxed);

        (provisional, selected_by_probabilistic_filter)
    }

    /// When a SecondChance trace is promoted to Sampled in the second pass,
    /// the policy slot that voted SecondChance is rewritten to Sampled so
    /// that a late-arriving span later finds the winning policy by scanning
    /// for a Sampled entry when a late-arriving span looks for attribution.
    fn promote_winning_policy_slot(&self, record: &TraceRecord) {
        let num_slots = self.num_policies();
        for index in 0..num_slots {
            if record.policy_decision(index) == Decision::SecondChance {
                record.set_policy_decision(index, Decision::Sampled);
                return;
            }
        }
    }

    /// Finds the name of the policy whose vote for `record` equals `target`,
    /// for metrics attribution. The probabilistic pre-filter only ever votes
    /// `Sampled` (it has no `SecondChance` outcome), so it is only
    /// substituted in when `target` is `Decision::Sampled`.
    fn attribution_for(
        &self,
        record: &TraceRecord,
        selected_by_probabilistic_filter: bool,
        target: Decision,
    ) -> String {
        if selected_by_probabilistic_filter && target == Decision::Sampled {
            return "probabilistic_pre_filter".to_string();
        }
        let offset = self.probabilistic_filter.is_some() as usize;
        for (index, policy) in self.policies.iter().enumerate() {
            if record.policy_decision(index + offset) == target {
                return policy.name().to_string();
            }
        }
        "unknown".to_string()
    }
}

fn now_unix_second() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AlwaysSample, Cascading, NumericAttribute};
    use crate::span::{AttributeValue, RawSpan, Span};
    use sampler_config::policy::{CascadingConfig, CascadingRuleConfig, PolicyVariantConfig};
    use std::collections::HashMap;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct MockConsumer {
        received: TokioMutex<Vec<SampledTrace>>,
    }

    #[async_trait::async_trait]
    impl TraceConsumer for MockConsumer {
        async fn consume(&self, trace: SampledTrace) {
            self.received.lock().await.push(trace);
        }
    }

    fn span_with_status(id: TraceId, status: i64) -> Span {
        let mut attributes = HashMap::new();
        attributes.insert("http.status".to_string(), AttributeValue::Int(status));
        Span {
            trace_id: id,
            operation_name: "op".into(),
            is_root: true,
            start_unix_nanos: 0,
            end_unix_nanos: 1,
            attributes,
        }
    }

    fn group_of(id: TraceId, count: usize) -> SpanGroup {
        (0..count).map(|_| span_with_status(id, 200)).collect()
    }

    fn id_of(byte: u8) -> TraceId {
        TraceId::from_bytes(&[byte; 16]).0
    }

    fn engine_with(
        spans_per_second: u64,
        policies: Vec<Box<dyn Policy>>,
        consumer: Arc<MockConsumer>,
    ) -> Engine {
        Engine::new(
            100,
            1,
            spans_per_second,
            None,
            policies,
            consumer,
            CascadeMetrics::disabled(),
        )
    }

    #[tokio::test]
    async fn always_sample_under_budget_emits_all_and_empties_the_store() {
        let consumer = Arc::new(MockConsumer::default());
        let engine = engine_with(
            100,
            vec![Box::new(AlwaysSample::new("always".into()))],
            consumer.clone(),
        );

        for byte in [1u8, 2, 3] {
            engine.ingest(id_of(byte), group_of(id_of(byte), 5)).await;
        }

        engine.tick().await;

        assert_eq!(consumer.received.lock().await.len(), 3);
        assert_eq!(engine.live_traces(), 0);
    }

    #[tokio::test]
    async fn global_cap_enforces_second_chance_and_not_sampled() {
        let consumer = Arc::new(MockConsumer::default());
        let engine = engine_with(
            10,
            vec![Box::new(AlwaysSample::new("always".into()))],
            consumer.clone(),
        );

        engine.ingest(id_of(1), group_of(id_of(1), 5)).await;
        engine.ingest(id_of(2), group_of(id_of(2), 5)).await;
        engine.ingest(id_of(3), group_of(id_of(3), 5)).await;

        engine.tick().await;

        // A and B fit the 10-span budget; C does not and ends NotSampled.
        assert_eq!(consumer.received.lock().await.len(), 2);
        assert_eq!(engine.live_traces(), 0);
    }

    #[tokio::test]
    async fn cascading_second_chance_promotion_admits_all_three() {
        let consumer = Arc::new(MockConsumer::default());
        let cascading_config = CascadingConfig {
            rules: vec![CascadingRuleConfig {
                spans_per_second: 3,
                matcher: PolicyVariantConfig::AlwaysSample,
            }],
        };
        let cascading = Cascading::new("cascade".into(), &cascading_config).unwrap();
        let engine = engine_with(10, vec![Box::new(cascading)], consumer.clone());

        engine.ingest(id_of(1), group_of(id_of(1), 3)).await;
        engine.ingest(id_of(2), group_of(id_of(2), 3)).await;
        engine.ingest(id_of(3), group_of(id_of(3), 3)).await;

        engine.tick().await;

        assert_eq!(consumer.received.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn numeric_attribute_selects_only_the_matching_trace() {
        let consumer = Arc::new(MockConsumer::default());
        let engine = engine_with(
            100,
            vec![Box::new(NumericAttribute::new(
                "5xx".into(),
                "http.status".into(),
                400,
                599,
            ))],
            consumer.clone(),
        );

        let trace_x = id_of(1);
        let trace_y = id_of(2);
        engine.ingest(trace_x, vec![span_with_status(trace_x, 500)]).await;
        engine.ingest(trace_y, vec![span_with_status(trace_y, 200)]).await;

        engine.tick().await;

        let received = consumer.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].batches[0][0].trace_id, trace_x);
    }

    #[tokio::test]
    async fn late_arrival_after_decision_is_emitted_immediately() {
        let consumer = Arc::new(MockConsumer::default());
        let engine = engine_with(
            100,
            vec![Box::new(AlwaysSample::new("always".into()))],
            consumer.clone(),
        );

        let trace = id_of(1);
        engine.ingest(trace, group_of(trace, 2)).await;
        engine.tick().await;
        assert_eq!(consumer.received.lock().await.len(), 1);

        // a second span for the already-decided (and now evicted) trace
        engine.ingest(trace, vec![span_with_status(trace, 200)]).await;

        assert_eq!(consumer.received.lock().await.len(), 2);
        assert_eq!(engine.live_traces(), 0);
    }

    #[tokio::test]
    async fn eviction_is_fifo_before_the_first_tick() {
        let consumer = Arc::new(MockConsumer::default());
        let engine = Engine::new(
            2,
            1,
            100,
            None,
            vec![Box::new(AlwaysSample::new("always".into()))],
            consumer.clone(),
            CascadeMetrics::disabled(),
        );

        engine.ingest(id_of(1), group_of(id_of(1), 1)).await;
        engine.ingest(id_of(2), group_of(id_of(2), 1)).await;
        engine.ingest(id_of(3), group_of(id_of(3), 1)).await;

        assert_eq!(engine.live_traces(), 2);

        engine.tick().await;
        // only ids 2 and 3 were still live to be decided
        assert_eq!(consumer.received.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn probabilistic_selection_is_annotated_with_the_tick_wide_ratio() {
        let consumer = Arc::new(MockConsumer::default());
        let engine = Engine::new(
            100,
            1,
            100,
            Some(1.0),
            vec![],
            consumer.clone(),
            CascadeMetrics::disabled(),
        );

        engine.ingest(id_of(1), group_of(id_of(1), 5)).await;
        engine.ingest(id_of(2), group_of(id_of(2), 5)).await;

        engine.tick().await;

        let received = consumer.received.lock().await;
        assert_eq!(received.len(), 2);
        for trace in received.iter() {
            for span in &trace.batches[0] {
                let probability = span
                    .attributes
                    .get(crate::span::SAMPLING_PROBABILITY_ATTR)
                    .and_then(|v| v.as_double())
                    .expect("probabilistically selected span is annotated");
                assert_eq!(probability, 1.0);
            }
        }
    }

    #[tokio::test]
    async fn ingest_batch_groups_by_trace_id_and_tolerates_malformed_ids() {
        let consumer = Arc::new(MockConsumer::default());
        let engine = engine_with(
            100,
            vec![Box::new(AlwaysSample::new("always".into()))],
            consumer.clone(),
        );

        let well_formed_id = vec![1u8; 16];
        let malformed_id = vec![9u8; 3];

        let spans = vec![
            RawSpan {
                trace_id: well_formed_id.clone(),
                operation_name: "a".into(),
                is_root: true,
                start_unix_nanos: 0,
                end_unix_nanos: 1,
                attributes: HashMap::new(),
            },
            RawSpan {
                trace_id: well_formed_id.clone(),
                operation_name: "b".into(),
                is_root: false,
                start_unix_nanos: 1,
                end_unix_nanos: 2,
                attributes: HashMap::new(),
            },
            RawSpan {
                trace_id: malformed_id,
                operation_name: "c".into(),
                is_root: true,
                start_unix_nanos: 0,
                end_unix_nanos: 1,
                attributes: HashMap::new(),
            },
        ];

        engine.ingest_batch(spans).await;
        engine.tick().await;

        let received = consumer.received.lock().await;
        // two distinct trace ids: the well-formed one, whose two spans were
        // grouped together by ingest_batch, and the zero-padded malformed one
        assert_eq!(received.len(), 2);
        let grouped = received
            .iter()
            .find(|t| t.batches[0].len() == 2)
            .expect("the well-formed trace id's two spans were grouped together");
        assert_eq!(grouped.batches[0][0].operation_name, "a");
        assert_eq!(grouped.batches[0][1].operation_name, "b");
    }
}
