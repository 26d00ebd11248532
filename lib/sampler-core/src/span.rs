use std::collections::HashMap;

use crate::id::TraceId;

/// A span attribute value. Only the shapes the policy evaluators need to
/// inspect are modeled; anything richer belongs to the wire-format receiver,
/// which is out of scope here.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Double(f64),
    String(String),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            AttributeValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// A single timestamped unit of work.
#[derive(Debug, Clone)]
pub struct Span {
    pub trace_id: TraceId,
    pub operation_name: String,
    /// Whether this span is the trace's root (no parent within the trace).
    pub is_root: bool,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: u64,
    pub attributes: HashMap<String, AttributeValue>,
}

impl Span {
    pub fn duration_nanos(&self) -> u64 {
        self.end_unix_nanos.saturating_sub(self.start_unix_nanos)
    }

    pub fn set_sampling_probability(&mut self, ratio: f64) {
        let updated = match self.attributes.get(SAMPLING_PROBABILITY_ATTR) {
            Some(AttributeValue::Double(existing)) => existing * ratio,
            _ => ratio,
        };
        self.attributes.insert(
            SAMPLING_PROBABILITY_ATTR.to_string(),
            AttributeValue::Double(updated),
        );
    }
}

pub const SAMPLING_PROBABILITY_ATTR: &str = "sampling.probability";

/// The set of spans delivered together by one ingest call for one trace id,
/// i.e. one resource-attributed group of spans.
pub type SpanGroup = Vec<Span>;

/// An inbound span as presented at the external ingest boundary, before its
/// trace id has been canonicalized into a `TraceId`. `trace_id` is raw bytes
/// of whatever length the caller supplied; callers that already hold a
/// canonical `TraceId` should go through `Engine::ingest` directly instead.
#[derive(Debug, Clone)]
pub struct RawSpan {
    pub trace_id: Vec<u8>,
    pub operation_name: String,
    pub is_root: bool,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: u64,
    pub attributes: HashMap<String, AttributeValue>,
}

impl RawSpan {
    pub fn into_span(self, trace_id: TraceId) -> Span {
        Span {
            trace_id,
            operation_name: self.operation_name,
            is_root: self.is_root,
            start_unix_nanos: self.start_unix_nanos,
            end_unix_nanos: self.end_unix_nanos,
            attributes: self.attributes,
        }
    }
}

/// The fully concatenated, ordered trace handed to the downstream consumer.
#[derive(Debug, Clone, Default)]
pub struct SampledTrace {
    pub batches: Vec<SpanGroup>,
}

impl SampledTrace {
    pub fn span_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.len()).sum()
    }

    pub fn annotate_sampling_probability(&mut self, ratio: f64) {
        for batch in &mut self.batches {
            for span in batch {
                span.set_sampling_probability(ratio);
            }
        }
    }
}
