use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::engine::{LoopSettings, MageEngine, DEFAULT_MAX_TOOL_ROUNDS};
use super::fs::FilesystemProfile;
use super::image::ImageProfile;
use super::shell::ShellProfile;
use super::{Mage, MageVariant};
use crate::bounds::ProjectBounds;
use crate::conversation::Conversation;
use crate::errors::{MageError, MageResult};
use crate::prompt_template::Prompt;
use crate::providers::base::{Provider, RequestOptions};
use crate::providers::client::Client;
use crate::providers::configs::{ClientConfig, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::toolkits::image::image_retry_config;

/// Caller-facing portal configuration. Unset values fall back to the crate defaults.
#[derive(Debug, Clone, Default)]
pub struct PortalConfig {
    /// Must support function calling
    pub primary_model: String,
    /// Used for image understanding; defaults to the primary model
    pub image_model: Option<String>,
    /// For quick tasks without tools; defaults to the primary model
    pub mini_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub project_bounds: Vec<ProjectBounds>,
    pub max_tool_rounds: Option<usize>,
}

impl PortalConfig {
    pub fn new<S: Into<String>>(primary_model: S) -> Self {
        Self {
            primary_model: primary_model.into(),
            ..Default::default()
        }
    }

    pub fn with_image_model<S: Into<String>>(mut self, model: S) -> Self {
        self.image_model = Some(model.into());
        self
    }

    pub fn with_mini_model<S: Into<String>>(mut self, model: S) -> Self {
        self.mini_model = Some(model.into());
        self
    }

    pub fn with_project_bounds(mut self, bounds: Vec<ProjectBounds>) -> Self {
        self.project_bounds = bounds;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = Some(rounds);
        self
    }
}

/// Fully resolved settings shared by every mage a portal summons
#[derive(Clone)]
pub struct PortalSettings {
    pub provider: Arc<dyn Provider>,
    /// Backs the image kit's own conversations
    pub image_provider: Arc<dyn Provider>,
    pub primary_model: String,
    pub image_model: String,
    pub mini_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub project_bounds: Vec<ProjectBounds>,
    pub max_tool_rounds: usize,
}

impl PortalSettings {
    fn resolve(
        config: PortalConfig,
        provider: Arc<dyn Provider>,
        image_provider: Arc<dyn Provider>,
    ) -> Self {
        let primary_model = config.primary_model;
        Self {
            provider,
            image_provider,
            image_model: config.image_model.unwrap_or_else(|| primary_model.clone()),
            mini_model: config.mini_model.unwrap_or_else(|| primary_model.clone()),
            primary_model,
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            project_bounds: config.project_bounds,
            max_tool_rounds: config.max_tool_rounds.unwrap_or(DEFAULT_MAX_TOOL_ROUNDS),
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_tool_rounds: Some(self.max_tool_rounds),
        }
    }

    /// System message listing every project root, or `None` when there are no bounds
    pub fn bounds_advisory(&self, subject: &str, noun: &str) -> MageResult<Option<String>> {
        if self.project_bounds.is_empty() {
            return Ok(None);
        }
        let rendered = Prompt::ProjectBounds.render(&json!({
            "projects": self.project_bounds,
            "subject": subject,
            "noun": noun,
        }))?;
        Ok(Some(rendered))
    }
}

/// Summons mages that share one resolved configuration
#[derive(Clone)]
pub struct Portal {
    settings: Arc<PortalSettings>,
}

impl Portal {
    /// Build HTTP clients from `client` and resolve `config`
    pub fn new(client: ClientConfig, config: PortalConfig) -> MageResult<Self> {
        let image_client = Client::new(client.clone().with_retry(image_retry_config()))?;
        let client = Client::new(client)?;
        Ok(Self::from_providers(
            config,
            Arc::new(client),
            Arc::new(image_client),
        ))
    }

    /// Use one provider for every request, image analysis included
    pub fn with_provider(provider: Arc<dyn Provider>, config: PortalConfig) -> Self {
        Self::from_providers(config, provider.clone(), provider)
    }

    fn from_providers(
        config: PortalConfig,
        provider: Arc<dyn Provider>,
        image_provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            settings: Arc::new(PortalSettings::resolve(config, provider, image_provider)),
        }
    }

    pub fn settings(&self) -> &Arc<PortalSettings> {
        &self.settings
    }

    pub fn summon(&self, variant: MageVariant) -> MageResult<Box<dyn Mage>> {
        let settings = self.settings.clone();
        let mage: Box<dyn Mage> = match variant {
            MageVariant::Filesystem => Box::new(MageEngine::new(FilesystemProfile, settings)?),
            MageVariant::Image => Box::new(MageEngine::new(ImageProfile, settings)?),
            MageVariant::Shell => Box::new(MageEngine::new(ShellProfile, settings)?),
        };
        Ok(mage)
    }

    /// One tool-free completion on the mini model, for small jobs like summarizing a result
    pub async fn quick_task(
        &self,
        cancel: &CancellationToken,
        instruction: &str,
        input: &str,
    ) -> MageResult<String> {
        let settings = &self.settings;
        let mut conversation =
            Conversation::new(settings.provider.clone(), settings.mini_model.clone());
        conversation
            .add_system_message(instruction)
            .add_user_message(input);

        let reply = match conversation
            .send(cancel, settings.temperature, settings.max_tokens, RequestOptions::new())
            .await
        {
            Ok(reply) => reply,
            Err(err) if err.is_cancelled() || cancel.is_cancelled() => {
                return Err(MageError::Cancelled)
            }
            Err(err) => return Err(MageError::Response(err)),
        };
        reply
            .text()
            .map(str::to_string)
            .ok_or(MageError::NonTextContent)
    }
}
