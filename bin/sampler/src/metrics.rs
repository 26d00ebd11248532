use opentelemetry::metrics::Meter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use sampler_config::metrics::MetricsConfig;

pub struct MetricsSetup {
    pub provider: SdkMeterProvider,
    pub registry: prometheus::Registry,
}

/// Builds a meter provider backed by a Prometheus pull exporter, or returns
/// `None` when metrics are disabled — every consumer downstream treats an
/// absent `Meter` as a no-op, never a startup failure.
pub fn build_meter_provider(config: &MetricsConfig) -> Option<MetricsSetup> {
    if !config.is_enabled() {
        return None;
    }

    let registry = prometheus::Registry::new();
    let reader = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .expect("failed to build prometheus exporter");

    let provider = SdkMeterProvider::builder()
        .with_resource(Resource::builder().with_service_name("tail-sampler").build())
        .with_reader(reader)
        .build();

    Some(MetricsSetup { provider, registry })
}

pub fn meter(provider: &SdkMeterProvider) -> Meter {
    provider.meter("tail-sampler")
}
