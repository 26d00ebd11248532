use sampler_config::ConfigError;
use sampler_config::policy::PolicyConfigError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("policy configuration rejected: {0}")]
    Policy(#[from] PolicyConfigError),
}
