use sampler_core::{SampledTrace, TraceConsumer};
use tracing::info;

/// Reference downstream consumer: logs every emitted trace. The core treats
/// its consumer as an external collaborator; a real deployment
/// would swap this for an actual exporter, which is out of scope here.
pub struct LoggingTraceConsumer;

#[async_trait::async_trait]
impl TraceConsumer for LoggingTraceConsumer {
    async fn consume(&self, trace: SampledTrace) {
        info!(
            span_count = trace.span_count(),
            batch_count = trace.batches.len(),
            "emitting sampled trace"
        );
    }
}
