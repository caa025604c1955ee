use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by the transport layer and by conversations built on it.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("apiKey is required")]
    MissingApiKey,

    #[error("baseURL is required")]
    MissingBaseUrl,

    #[error("no response choices returned")]
    NoResponseChoices,

    #[error("failed to read image file: {0}")]
    ReadImageFile(#[source] std::io::Error),

    #[error("max retries exceeded: {0}")]
    MaxRetriesExceeded(#[source] Box<ClientError>),

    #[error("rate limit exceeded ({status}): retry after {retry_after:?}")]
    RateLimited {
        status: u16,
        retry_after: Duration,
        body: String,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to marshal request: {0}")]
    MarshalRequest(#[source] serde_json::Error),

    #[error("failed to read response body: {0}")]
    ReadResponseBody(#[source] reqwest::Error),

    #[error("API returned unexpected status code: {status}: {body}")]
    UnexpectedStatusCode { status: u16, body: String },

    #[error("failed to unmarshal response: {0}")]
    UnmarshalResponse(#[source] serde_json::Error),

    #[error("error reading stream: {0}")]
    ReadStream(#[source] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// True when the failure was caused by the caller cancelling the request.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ClientError::Cancelled => true,
            ClientError::MaxRetriesExceeded(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}

/// Failures raised while executing a single tool call. These never stop the
/// orchestration loop; they are fed back to the model as tool results.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool '{0}' not found in toolkit")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("{0}")]
    PathViolation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures surfaced by a mage or the agent to its caller.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MageError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("failed to get response: {0}")]
    Response(#[source] ClientError),

    #[error("response content is not a string")]
    NonTextContent,

    #[error("tool loop exceeded {0} rounds without a final answer")]
    ToolLoopExceeded(usize),

    #[error("request already in progress")]
    Busy,

    #[error("agent not started")]
    NotStarted,

    #[error("agent already running")]
    AlreadyRunning,

    #[error("unknown variant: {0}")]
    UnknownVariant(String),

    #[error("no callback set")]
    NoCallback,

    #[error("invalid toolkit: {0}")]
    Kit(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed to render prompt: {0}")]
    Prompt(#[from] tera::Error),
}

pub type MageResult<T> = Result<T, MageError>;
