use async_trait::async_trait;

use crate::span::SampledTrace;

/// The downstream collaborator the engine forwards sampled traces to,
/// external and format-agnostic: the same method is invoked both for
/// full-batch emissions out of the decision loop and for single-span late
/// arrivals of an already-sampled trace.
#[async_trait]
pub trait TraceConsumer: Send + Sync {
    async fn consume(&self, trace: SampledTrace);
}
