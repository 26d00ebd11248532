use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use sampler_core::{AttributeValue, Engine, RawSpan};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Minimal synthetic span generator used to drive the engine when no wire
/// receiver is wired up. The actual receiver is an external collaborator;
/// this exists only so the binary does something observable.
pub struct SyntheticSpanSource {
    engine: Arc<Engine>,
}

impl SyntheticSpanSource {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("synthetic span source stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.emit_one_trace().await;
                }
            }
        }
    }

    async fn emit_one_trace(&self) {
        let mut id_bytes = [0u8; 16];
        rand::rng().fill(&mut id_bytes);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;

        let mut attributes = HashMap::new();
        attributes.insert(
            "http.status".to_string(),
            AttributeValue::Int(rand::rng().random_range(200..=599)),
        );

        let raw_span = RawSpan {
            trace_id: id_bytes.to_vec(),
            operation_name: "GET /demo".to_string(),
            is_root: true,
            start_unix_nanos: now,
            end_unix_nanos: now + 1_000_000,
            attributes,
        };

        self.engine.ingest_batch(vec![raw_span]).await;
    }
}
