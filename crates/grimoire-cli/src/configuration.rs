use std::path::PathBuf;

use config::{Config, Environment, File};
use grimoire::providers::configs::{default_model_for, ClientConfig, DEFAULT_BASE_URL};
use serde::Deserialize;

use crate::error::{to_env_var, ConfigError, ENV_PREFIX};

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Falls back to the provider's default model for `base_url`
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub image_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ProviderSettings {
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| default_model_for(&self.base_url).to_string())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.api_key, &self.base_url)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub max_tool_rounds: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Values given on the command line. They win over files and the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub image_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Settings {
    pub fn new(overrides: &Overrides) -> Result<Self, ConfigError> {
        let settings = Self::load(overrides)?;
        if settings.provider.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("provider.api_key"),
            });
        }
        Ok(settings)
    }

    fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().set_default("provider.base_url", default_base_url())?;

        if let Some(path) = &overrides.config_file {
            builder = builder.add_source(File::from(path.as_path()));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("provider.api_key", overrides.api_key.clone())?
            .set_override_option("provider.base_url", overrides.base_url.clone())?
            .set_override_option("provider.model", overrides.model.clone())?
            .set_override_option("provider.image_model", overrides.image_model.clone())?
            .set_override_option("provider.temperature", overrides.temperature.map(f64::from))?
            .set_override_option("provider.max_tokens", overrides.max_tokens.map(u64::from))?
            .build()?;

        config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            match &err {
                config::ConfigError::NotFound(field) => ConfigError::MissingEnvVar {
                    env_var: to_env_var(field),
                },
                _ => ConfigError::Other(err),
            }
        })
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire::providers::configs::{ANTHROPIC_DEFAULT_MODEL, DEFAULT_MODEL};
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("GRIMOIRE_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("GRIMOIRE_PROVIDER__API_KEY", "test-key");

        let settings = Settings::new(&Overrides::default()).unwrap();
        assert_eq!(settings.provider.api_key, "test-key");
        assert_eq!(settings.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.provider.model(), DEFAULT_MODEL);
        assert_eq!(settings.provider.image_model, None);
        assert_eq!(settings.provider.temperature, None);
        assert_eq!(settings.provider.max_tokens, None);
        assert_eq!(settings.agent.max_tool_rounds, None);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_environment_settings() {
        clean_env();
        env::set_var("GRIMOIRE_PROVIDER__API_KEY", "test-key");
        env::set_var("GRIMOIRE_PROVIDER__BASE_URL", "https://api.anthropic.com");
        env::set_var("GRIMOIRE_PROVIDER__TEMPERATURE", "0.2");
        env::set_var("GRIMOIRE_PROVIDER__MAX_TOKENS", "2000");
        env::set_var("GRIMOIRE_AGENT__MAX_TOOL_ROUNDS", "5");

        let settings = Settings::new(&Overrides::default()).unwrap();
        assert_eq!(settings.provider.model(), ANTHROPIC_DEFAULT_MODEL);
        assert!(settings.provider.client_config().is_anthropic());
        assert_eq!(settings.provider.temperature, Some(0.2));
        assert_eq!(settings.provider.max_tokens, Some(2000));
        assert_eq!(settings.agent.max_tool_rounds, Some(5));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_flags_override_environment() {
        clean_env();
        env::set_var("GRIMOIRE_PROVIDER__API_KEY", "env-key");
        env::set_var("GRIMOIRE_PROVIDER__MODEL", "grok-3");

        let overrides = Overrides {
            api_key: Some("flag-key".to_string()),
            model: Some("grok-4-fast".to_string()),
            temperature: Some(0.5),
            ..Default::default()
        };
        let settings = Settings::new(&overrides).unwrap();
        assert_eq!(settings.provider.api_key, "flag-key");
        assert_eq!(settings.provider.model(), "grok-4-fast");
        assert_eq!(settings.provider.temperature, Some(0.5));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_config_file_below_environment() {
        clean_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grimoire.toml");
        std::fs::write(
            &path,
            "[provider]\napi_key = \"file-key\"\nmodel = \"file-model\"\n\n[agent]\nmax_tool_rounds = 3\n",
        )
        .unwrap();
        env::set_var("GRIMOIRE_PROVIDER__MODEL", "env-model");

        let overrides = Overrides {
            config_file: Some(path),
            ..Default::default()
        };
        let settings = Settings::new(&overrides).unwrap();
        assert_eq!(settings.provider.api_key, "file-key");
        assert_eq!(settings.provider.model(), "env-model");
        assert_eq!(settings.agent.max_tool_rounds, Some(3));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();

        let err = Settings::new(&Overrides::default()).unwrap_err();
        match err {
            ConfigError::MissingEnvVar { env_var } => {
                assert_eq!(env_var, "GRIMOIRE_PROVIDER__API_KEY")
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
