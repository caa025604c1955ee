use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::base::{Provider, RequestOptions};
use super::configs::{ClientConfig, RetryConfig};
use super::retry::{do_request_with_retry, PreparedRequest};
use super::streaming::handle_streaming_response;
use super::utils::{auth_headers, completions_url};
use crate::errors::ClientError;
use crate::models::completion::ChatCompletionResponse;
use crate::models::message::Message;

/// An HTTP chat-completion client with retry and optional streaming
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    /// Validate `config` and build the underlying HTTP client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.api_key.is_empty() {
            return Err(ClientError::MissingApiKey);
        }
        if config.base_url.is_empty() {
            return Err(ClientError::MissingBaseUrl);
        }

        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Swap in a preconfigured HTTP client (proxies, custom TLS, ...)
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send the message history to `model`.
    ///
    /// `temperature` and `max_tokens` form the base layer; anything set in `options` wins.
    pub async fn send_with(
        &self,
        cancel: &CancellationToken,
        temperature: f32,
        max_tokens: u32,
        messages: &[Message],
        model: &str,
        options: RequestOptions,
    ) -> Result<ChatCompletionResponse, ClientError> {
        let options = RequestOptions::new()
            .with_temperature(temperature)
            .with_max_tokens(max_tokens)
            .merge(options);
        self.send(cancel, model, messages, options).await
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        model: &str,
        messages: &[Message],
        options: RequestOptions,
    ) -> Result<ChatCompletionResponse, ClientError> {
        let (request, sink) = options.into_request(model, messages);
        debug!(model, messages = messages.len(), stream = request.stream, "sending chat completion");

        let body = serde_json::to_vec(&request).map_err(ClientError::MarshalRequest)?;
        let prepared = PreparedRequest {
            url: completions_url(&self.config.base_url),
            headers: auth_headers(&self.config),
            body,
        };

        let response =
            do_request_with_retry(&self.http, &prepared, &self.config.retry, cancel).await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::UnexpectedStatusCode {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(sink) = sink {
            return handle_streaming_response(response, sink, cancel).await;
        }

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            bytes = response.bytes() => bytes.map_err(ClientError::ReadResponseBody)?,
        };
        serde_json::from_slice(&bytes).map_err(ClientError::UnmarshalResponse)
    }
}

#[async_trait]
impl Provider for Client {
    async fn send(
        &self,
        cancel: &CancellationToken,
        model: &str,
        messages: &[Message],
        options: RequestOptions,
    ) -> Result<ChatCompletionResponse, ClientError> {
        let response = self
            .execute(cancel, model, messages, options)
            .await
            .map_err(|err| {
                if cancel.is_cancelled() {
                    ClientError::Cancelled
                } else {
                    err
                }
            })?;

        let Some(choice) = response.choices.first() else {
            return Err(ClientError::NoResponseChoices);
        };
        if choice.is_truncated() {
            warn!(
                model,
                finish_reason = choice.finish_reason.as_deref().unwrap_or_default(),
                "response truncated by the token limit"
            );
        }

        Ok(response)
    }
}
