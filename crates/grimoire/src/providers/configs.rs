use std::time::Duration;

pub const XAI_BASE_URL: &str = "https://api.x.ai";
pub const XAI_DEFAULT_MODEL: &str = "grok-4";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

pub const DEFAULT_BASE_URL: &str = XAI_BASE_URL;
pub const DEFAULT_MODEL: &str = XAI_DEFAULT_MODEL;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Overall HTTP timeout per request, streaming included
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
/// Wait applied to a 429 that carries no usable Retry-After header
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

pub const ANTHROPIC_HOST_MARKER: &str = "anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            enabled: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no backoff
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Retries actually available per request
    pub fn effective_retries(&self) -> u32 {
        if self.enabled {
            self.max_retries
        } else {
            0
        }
    }

    /// The delay that follows `delay`: multiplied by the backoff factor and capped at `max_delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.backoff_factor).min(self.max_delay)
    }
}

/// Everything needed to construct a transport client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl ClientConfig {
    pub fn new<K: Into<String>, U: Into<String>>(api_key: K, base_url: U) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True when the base URL points at Anthropic, which authenticates with `x-api-key`
    pub fn is_anthropic(&self) -> bool {
        self.base_url.contains(ANTHROPIC_HOST_MARKER)
    }
}

/// The default model for a known provider base URL
pub fn default_model_for(base_url: &str) -> &'static str {
    if base_url.contains(ANTHROPIC_HOST_MARKER) {
        ANTHROPIC_DEFAULT_MODEL
    } else if base_url.contains("openai.com") {
        OPENAI_DEFAULT_MODEL
    } else {
        DEFAULT_MODEL
    }
}
