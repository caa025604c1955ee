use thiserror::Error;

pub const ENV_PREFIX: &str = "GRIMOIRE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting, set {env_var} or pass the matching flag")]
    MissingEnvVar { env_var: String },
    #[error("configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that feeds a dotted settings key, e.g. `provider.api_key`
pub fn to_env_var(field: &str) -> String {
    format!("{}_{}", ENV_PREFIX, field.replace('.', "__").to_uppercase())
}
