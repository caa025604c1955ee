use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::base::StreamSender;
use crate::errors::ClientError;
use crate::models::completion::{ChatCompletionResponse, Choice, Usage};
use crate::models::message::{Message, MessageContent, Role, ToolCall};
use crate::models::null_as_default;

const DONE_SENTINEL: &str = "[DONE]";

/// One incremental unit delivered while a streaming request is in flight
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Content(String),
    Error(String),
    Done,
}

#[derive(Debug, Default, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tool_calls: Vec<StreamToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    created: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// Reassembles a full assistant message from SSE delta lines
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: String,
    model: String,
    created: i64,
    content: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

/// What one line contributed to the stream
#[derive(Debug, PartialEq)]
pub enum LineOutcome {
    /// Nothing to forward: blank line, comment, or unparseable payload
    Skipped,
    /// A delta was folded in; carries the text fragment, if any
    Delta(Option<String>),
    Done,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw line of the event stream into the accumulated state
    pub fn push_line(&mut self, line: &str) -> LineOutcome {
        let line = line.trim();
        if line.is_empty() {
            return LineOutcome::Skipped;
        }

        let data = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
        if data == DONE_SENTINEL {
            return LineOutcome::Done;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                debug!(line = data, error = %err, "skipping unparseable stream line");
                return LineOutcome::Skipped;
            }
        };

        if self.id.is_empty() {
            self.id = event.id;
            self.model = event.model;
            self.created = event.created;
        }
        if event.usage.is_some() {
            self.usage = event.usage;
        }

        let mut text = None;
        for choice in event.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.content.push_str(&content);
                text.get_or_insert_with(String::new).push_str(&content);
            }
            for fragment in choice.delta.tool_calls {
                self.push_tool_fragment(fragment);
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        LineOutcome::Delta(text)
    }

    fn push_tool_fragment(&mut self, fragment: StreamToolCallDelta) {
        let function = fragment.function.unwrap_or_default();

        match fragment.id.filter(|id| !id.is_empty()) {
            Some(id) => self.tool_calls.push(ToolCall::new(
                id,
                function.name.unwrap_or_default(),
                function.arguments.unwrap_or_default(),
            )),
            None => {
                // Continuations without a preceding call have nothing to attach to
                let Some(current) = self.tool_calls.last_mut() else {
                    return;
                };
                if let Some(name) = function.name {
                    current.function.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    current.function.arguments.push_str(&arguments);
                }
            }
        }
    }

    /// The single response a buffered request would have produced
    pub fn finish(self) -> ChatCompletionResponse {
        let message = Message {
            role: Role::Assistant,
            content: Some(MessageContent::Text(self.content)),
            name: None,
            tool_calls: self.tool_calls,
            tool_call_id: None,
        };

        ChatCompletionResponse {
            id: self.id,
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model,
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
        }
    }
}

/// Splits raw body bytes into lines. Bytes are only decoded once a whole line is
/// present, so a character split across network chunks survives intact.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left after the body ended without a final newline
    fn remainder(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

/// Read an SSE response body to completion, forwarding text to `sink` as it arrives.
///
/// `sink` is consumed and dropped on every exit path, which closes the channel.
pub async fn handle_streaming_response(
    response: reqwest::Response,
    sink: StreamSender,
    cancel: &CancellationToken,
) -> Result<ChatCompletionResponse, ClientError> {
    read_event_stream(response.bytes_stream(), sink, cancel).await
}

async fn read_event_stream<S, B>(
    stream: S,
    sink: StreamSender,
    cancel: &CancellationToken,
) -> Result<ChatCompletionResponse, ClientError>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    futures::pin_mut!(stream);
    let mut buffer = LineBuffer::default();
    let mut accumulator = StreamAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(StreamChunk::Error(ClientError::Cancelled.to_string())).await;
                return Err(ClientError::Cancelled);
            }
            next = stream.next() => next,
        };

        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                let err = ClientError::ReadStream(err);
                let _ = sink.send(StreamChunk::Error(err.to_string())).await;
                return Err(err);
            }
            None => break,
        };

        buffer.push(bytes.as_ref());
        while let Some(line) = buffer.next_line() {
            match accumulator.push_line(&line) {
                LineOutcome::Done => {
                    let _ = sink.send(StreamChunk::Done).await;
                    return Ok(accumulator.finish());
                }
                LineOutcome::Delta(Some(text)) => {
                    let _ = sink.send(StreamChunk::Content(text)).await;
                }
                LineOutcome::Delta(None) | LineOutcome::Skipped => {}
            }
        }
    }

    // A body that ends without the sentinel still yields what was received
    if let LineOutcome::Delta(Some(text)) = accumulator.push_line(&buffer.remainder()) {
        let _ = sink.send(StreamChunk::Content(text)).await;
    }
    let _ = sink.send(StreamChunk::Done).await;
    Ok(accumulator.finish())
}
