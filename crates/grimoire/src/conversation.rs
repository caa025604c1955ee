use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::ClientError;
use crate::models::completion::Usage;
use crate::models::message::{ContentItem, Message};
use crate::models::tool::{Tool, ToolChoice};
use crate::providers::base::{Provider, RequestOptions};

/// An append-only message log bound to one model and a fixed set of request options.
///
/// A conversation is owned by a single orchestration loop. Resetting means building
/// a new one; the log never shrinks.
pub struct Conversation {
    provider: Arc<dyn Provider>,
    model: String,
    options: RequestOptions,
    messages: Vec<Message>,
    last_usage: Option<Usage>,
}

impl Conversation {
    pub fn new<S: Into<String>>(provider: Arc<dyn Provider>, model: S) -> Self {
        Self {
            provider,
            model: model.into(),
            options: RequestOptions::default(),
            messages: Vec::new(),
            last_usage: None,
        }
    }

    /// Fix the options sent with every request; a streaming sink set here is ignored
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = RequestOptions {
            stream: None,
            ..options
        };
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.options.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.options.tool_choice = Some(tool_choice);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Token usage reported by the most recent successful send
    pub fn last_usage(&self) -> Option<&Usage> {
        self.last_usage.as_ref()
    }

    pub fn add_message(&mut self, message: Message) -> &mut Self {
        self.messages.push(message);
        self
    }

    pub fn add_system_message<S: Into<String>>(&mut self, text: S) -> &mut Self {
        self.add_message(Message::system(text))
    }

    pub fn add_user_message<S: Into<String>>(&mut self, text: S) -> &mut Self {
        self.add_message(Message::user(text))
    }

    pub fn add_assistant_message<S: Into<String>>(&mut self, text: S) -> &mut Self {
        self.add_message(Message::assistant(text))
    }

    /// Append a user message made of text plus one embedded base64 image
    pub fn add_complex_user_message(
        &mut self,
        text: &str,
        image_base64: &str,
        mime_type: &str,
        detail: Option<&str>,
    ) -> &mut Self {
        self.add_message(Message::user_items(vec![
            ContentItem::text(text),
            ContentItem::image_base64(image_base64, mime_type, detail),
        ]))
    }

    /// Answer a tool call. The id is not checked against earlier calls; the provider rejects strays.
    pub fn add_tool_result<I: Into<String>, S: Into<String>>(
        &mut self,
        tool_call_id: I,
        content: S,
    ) -> &mut Self {
        self.add_message(Message::tool_result(tool_call_id, content))
    }

    /// Send the whole history and append the reply.
    ///
    /// `temperature` and `max_tokens` are the base layer, then the conversation's fixed
    /// options, then `overrides`. On failure the log is left exactly as it was.
    pub async fn send(
        &mut self,
        cancel: &CancellationToken,
        temperature: f32,
        max_tokens: u32,
        overrides: RequestOptions,
    ) -> Result<Message, ClientError> {
        let options = RequestOptions::new()
            .with_temperature(temperature)
            .with_max_tokens(max_tokens)
            .merge(self.options.clone())
            .merge(overrides);

        let response = self
            .provider
            .send(cancel, &self.model, &self.messages, options)
            .await?;

        let Some(choice) = response.choices.into_iter().next() else {
            return Err(ClientError::NoResponseChoices);
        };

        self.last_usage = response.usage;
        self.messages.push(choice.message.clone());
        Ok(choice.message)
    }
}
