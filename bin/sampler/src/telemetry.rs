use std::str::FromStr;

use sampler_config::log::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn configure_logging(config: &LoggingConfig) {
    let filter = EnvFilter::from_str(&config.filter)
        .unwrap_or_else(|e| panic!("failed to initialize env-filter logger: {}", e));

    let layer = if config.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().compact().boxed()
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
}
