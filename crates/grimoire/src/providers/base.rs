use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::streaming::StreamChunk;
use crate::errors::ClientError;
use crate::models::completion::{ChatCompletionRequest, ChatCompletionResponse};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolChoice};

/// The sending half of a streaming sink. Exactly one request writes to it and
/// drops it when that request ends.
pub type StreamSender = mpsc::Sender<StreamChunk>;

/// Per-request knobs. Unset fields leave the value underneath them untouched
/// when layered with [`RequestOptions::merge`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: Option<StreamSender>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    /// Stream incremental content to `sender` instead of waiting for the full body
    pub fn with_stream(mut self, sender: StreamSender) -> Self {
        self.stream = Some(sender);
        self
    }

    /// Layer `overrides` on top of these options; fields set in `overrides` win
    pub fn merge(self, overrides: RequestOptions) -> Self {
        Self {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            tools: overrides.tools.or(self.tools),
            tool_choice: overrides.tool_choice.or(self.tool_choice),
            stream: overrides.stream.or(self.stream),
        }
    }

    /// Split into the wire body and the optional streaming sink
    pub fn into_request(
        self,
        model: &str,
        messages: &[Message],
    ) -> (ChatCompletionRequest, Option<StreamSender>) {
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: self.stream.is_some(),
            tools: self.tools.unwrap_or_default(),
            tool_choice: self.tool_choice,
        };
        (request, self.stream)
    }
}

/// A chat-completion backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Perform one logical chat completion against `model` with the full message history.
    ///
    /// Streaming and buffered requests both resolve to a single response. Implementations
    /// must return [`ClientError::Cancelled`] once `cancel` fires and must fail with
    /// [`ClientError::NoResponseChoices`] rather than return an empty choice list.
    async fn send(
        &self,
        cancel: &CancellationToken,
        model: &str,
        messages: &[Message],
        options: RequestOptions,
    ) -> Result<ChatCompletionResponse, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_later_wins() {
        let base = RequestOptions::new()
            .with_temperature(0.7)
            .with_max_tokens(8192);
        let fixed = RequestOptions::new()
            .with_tools(vec![Tool::new("ls", "list", json!({}))])
            .with_tool_choice(ToolChoice::Auto);
        let call = RequestOptions::new().with_temperature(0.1);

        let merged = base.merge(fixed).merge(call);
        assert_eq!(merged.temperature, Some(0.1));
        assert_eq!(merged.max_tokens, Some(8192));
        assert_eq!(merged.tools.map(|t| t.len()), Some(1));
        assert_eq!(merged.tool_choice, Some(ToolChoice::Auto));
    }

    #[test]
    fn test_into_request_sets_stream_flag() {
        let (tx, _rx) = mpsc::channel(1);
        let (request, sink) = RequestOptions::new()
            .with_stream(tx)
            .into_request("m", &[Message::user("hi")]);
        assert!(request.stream);
        assert!(sink.is_some());
        assert_eq!(request.messages.len(), 1);

        let (request, sink) = RequestOptions::new().into_request("m", &[]);
        assert!(!request.stream);
        assert!(sink.is_none());
    }
}
