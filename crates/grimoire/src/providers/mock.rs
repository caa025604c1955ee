use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use super::base::{Provider, RequestOptions};
use super::streaming::StreamChunk;
use crate::errors::ClientError;
use crate::models::completion::{ChatCompletionRequest, ChatCompletionResponse, Choice, Usage};
use crate::models::message::{Message, ToolCall};

/// One scripted reply
pub enum MockReply {
    Message(Message),
    Error(ClientError),
    /// Block until the request is cancelled
    Hang,
}

impl From<Message> for MockReply {
    fn from(message: Message) -> Self {
        MockReply::Message(message)
    }
}

/// A mock provider that returns pre-configured responses and records every request
#[derive(Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<Vec<MockReply>>>,
    requests: Arc<Mutex<Vec<ChatCompletionRequest>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new<R: Into<MockReply>>(replies: Vec<R>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().map(Into::into).collect())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// An assistant message requesting a single tool call
pub fn tool_call_message(id: &str, name: &str, arguments: &str) -> Message {
    let mut message = Message::assistant("");
    message.content = None;
    message.with_tool_call(ToolCall::new(id, name, arguments))
}

#[async_trait]
impl Provider for MockProvider {
    async fn send(
        &self,
        cancel: &CancellationToken,
        model: &str,
        messages: &[Message],
        options: RequestOptions,
    ) -> Result<ChatCompletionResponse, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let (request, sink) = options.into_request(model, messages);
        self.requests.lock().unwrap().push(request);

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                // Return empty response if no more pre-configured responses
                MockReply::Message(Message::assistant(""))
            } else {
                replies.remove(0)
            }
        };

        let message = match reply {
            MockReply::Message(message) => message,
            MockReply::Error(err) => {
                // A streaming transport reports the failure on the stream before returning it
                if let Some(sink) = sink {
                    let _ = sink.send(StreamChunk::Error(err.to_string())).await;
                }
                return Err(err);
            }
            MockReply::Hang => {
                cancel.cancelled().await;
                if let Some(sink) = sink {
                    let _ = sink.send(StreamChunk::Error("request cancelled".into())).await;
                }
                return Err(ClientError::Cancelled);
            }
        };

        if let Some(sink) = sink {
            if let Some(text) = message.text().filter(|t| !t.is_empty()) {
                let _ = sink.send(StreamChunk::Content(text.to_string())).await;
            }
            let _ = sink.send(StreamChunk::Done).await;
        }

        Ok(ChatCompletionResponse {
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                prompt_tokens_details: None,
            }),
            ..Default::default()
        })
    }
}
