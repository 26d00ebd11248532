use std::sync::Arc;

use sampler_config::load_config;
use sampler_core::{CascadeMetrics, Engine};
use tail_sampler::background_tasks::{BackgroundTask, BackgroundTasksManager};
use tail_sampler::consumer::LoggingTraceConsumer;
use tail_sampler::error::AppError;
use tail_sampler::metrics::{build_meter_provider, meter};
use tail_sampler::span_source::SyntheticSpanSource;
use tail_sampler::telemetry::configure_logging;
use tokio_util::sync::CancellationToken;

struct DecisionLoopTask {
    engine: Arc<Engine>,
}

#[async_trait::async_trait]
impl BackgroundTask for DecisionLoopTask {
    fn id(&self) -> &str {
        "decision-loop"
    }

    async fn run(&self, token: CancellationToken) {
        self.engine.clone().run_decision_loop(token).await;
    }
}

struct SpanSourceTask {
    source: SyntheticSpanSource,
}

#[async_trait::async_trait]
impl BackgroundTask for SpanSourceTask {
    fn id(&self) -> &str {
        "synthetic-span-source"
    }

    async fn run(&self, token: CancellationToken) {
        self.source.run(token).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config_path = std::env::var("SAMPLER_CONFIG_FILE_PATH").ok();
    let config = load_config(config_path)?;
    configure_logging(&config.log);

    let meter_setup = build_meter_provider(&config.metrics);
    let meter_instance = meter_setup.as_ref().map(|setup| meter(&setup.provider));
    let metrics = CascadeMetrics::new(meter_instance.as_ref());

    let policies = sampler_core::policy::build_policies(&config.policies)?;
    let batcher_depth = config.decision_wait.as_secs().max(1) as usize;

    let engine = Arc::new(Engine::new(
        config.num_traces,
        batcher_depth,
        config.spans_per_second,
        config.probabilistic_filtering_ratio,
        policies,
        Arc::new(LoggingTraceConsumer),
        metrics,
    ));

    let mut manager = BackgroundTasksManager::new();
    manager.register_task(Arc::new(DecisionLoopTask {
        engine: engine.clone(),
    }));
    manager.register_task(Arc::new(SpanSourceTask {
        source: SyntheticSpanSource::new(engine.clone()),
    }));

    tokio::signal::ctrl_c().await.ok();
    manager.shutdown().await;

    Ok(())
}
