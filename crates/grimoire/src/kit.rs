use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::errors::{MageError, MageResult, ToolError, ToolResult};
use crate::models::message::{Message, ToolCall};
use crate::models::tool::Tool;
use crate::providers::utils::is_valid_function_name;

/// What a tool hands back to the model
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Bytes(Vec<u8>),
    Structured(Map<String, Value>),
}

/// Stringification used when a result is written into the conversation
impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutput::Text(text) => f.write_str(text),
            ToolOutput::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            ToolOutput::Structured(map) => {
                let json = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<Map<String, Value>> for ToolOutput {
    fn from(map: Map<String, Value>) -> Self {
        ToolOutput::Structured(map)
    }
}

/// Decode raw tool arguments, mapping failures to [`ToolError::InvalidParameters`]
pub fn parse_arguments<T: DeserializeOwned>(arguments: &[u8]) -> ToolResult<T> {
    serde_json::from_slice(arguments).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

/// Executes one tool given its raw JSON arguments
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: &[u8]) -> ToolResult<ToolOutput>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F> ToolExecutor for FnExecutor<F>
where
    F: Fn(&[u8]) -> ToolResult<ToolOutput> + Send + Sync,
{
    async fn execute(&self, arguments: &[u8]) -> ToolResult<ToolOutput> {
        (self.0)(arguments)
    }
}

/// A declaration paired with the executor behind it
#[derive(Clone)]
pub struct KitTool {
    declaration: Tool,
    executor: Arc<dyn ToolExecutor>,
}

impl KitTool {
    pub fn new<E: ToolExecutor + 'static>(declaration: Tool, executor: E) -> Self {
        Self {
            declaration,
            executor: Arc::new(executor),
        }
    }

    /// Build a tool from a synchronous function over the raw argument bytes
    pub fn from_fn<F>(declaration: Tool, f: F) -> Self
    where
        F: Fn(&[u8]) -> ToolResult<ToolOutput> + Send + Sync + 'static,
    {
        Self::new(declaration, FnExecutor(f))
    }

    pub fn name(&self) -> &str {
        self.declaration.name()
    }

    pub fn declaration(&self) -> &Tool {
        &self.declaration
    }
}

/// The result of one tool call, keyed by the id the model gave it
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub id: String,
    pub name: String,
    pub result: ToolResult<ToolOutput>,
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    /// Text for the tool-result message: the output, or `Error: <msg>`
    pub fn content(&self) -> String {
        match &self.result {
            Ok(output) => output.to_string(),
            Err(err) => format!("Error: {}", err),
        }
    }
}

/// Observes every tool outcome as it is produced
pub type ToolCallback = Arc<dyn Fn(&ToolOutcome) + Send + Sync>;

/// A named, read-only registry of tools
pub struct Kit {
    name: String,
    tools: Vec<KitTool>,
    declarations: OnceLock<Vec<Tool>>,
    callback: Option<ToolCallback>,
}

impl fmt::Debug for Kit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kit")
            .field("name", &self.name)
            .field("tools", &self.tools.iter().map(KitTool::name).collect::<Vec<_>>())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Kit {
    pub fn builder<S: Into<String>>(name: S) -> KitBuilder {
        KitBuilder {
            name: name.into(),
            tools: Vec::new(),
            callback: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declarations exposed to the model, computed on first use and cached
    pub fn get_tools(&self) -> &[Tool] {
        self.declarations
            .get_or_init(|| self.tools.iter().map(|t| t.declaration.clone()).collect())
    }

    /// Install or replace the observation callback
    pub fn set_callback(&mut self, callback: ToolCallback) {
        self.callback = Some(callback);
    }

    /// Run one tool call. Unknown names and executor failures become error outcomes.
    pub async fn call(&self, tool_call: &ToolCall) -> ToolOutcome {
        let result = match self.tools.iter().find(|t| t.name() == tool_call.name()) {
            Some(tool) => tool.executor.execute(tool_call.arguments()).await,
            None => Err(ToolError::ToolNotFound(tool_call.name().to_string())),
        };

        let outcome = ToolOutcome {
            id: tool_call.id.clone(),
            name: tool_call.name().to_string(),
            result,
        };

        match &outcome.result {
            Ok(_) => info!(kit = %self.name, tool = %outcome.name, id = %outcome.id, "tool call succeeded"),
            Err(err) => error!(kit = %self.name, tool = %outcome.name, id = %outcome.id, error = %err, "tool call failed"),
        }
        if let Some(callback) = &self.callback {
            callback(&outcome);
        }
        outcome
    }

    /// Run every call in order. One failing call never stops the rest.
    pub async fn dispatch(&self, tool_calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(tool_calls.len());
        for tool_call in tool_calls {
            outcomes.push(self.call(tool_call).await);
        }
        outcomes
    }

    /// Dispatch the tool calls carried by an assistant reply.
    ///
    /// Requires a callback to be registered, since that is how callers observe outcomes.
    pub async fn handle_response_calls(&self, response: &Message) -> MageResult<Vec<ToolOutcome>> {
        if self.callback.is_none() {
            return Err(MageError::NoCallback);
        }
        Ok(self.dispatch(&response.tool_calls).await)
    }
}

pub struct KitBuilder {
    name: String,
    tools: Vec<KitTool>,
    callback: Option<ToolCallback>,
}

impl KitBuilder {
    pub fn with_tool(mut self, tool: KitTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools<I: IntoIterator<Item = KitTool>>(mut self, tools: I) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ToolOutcome) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Reject invalid or duplicate tool names
    pub fn build(self) -> MageResult<Kit> {
        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !is_valid_function_name(tool.name()) {
                return Err(MageError::Kit(format!(
                    "tool name '{}' must match [a-zA-Z0-9_-]+",
                    tool.name()
                )));
            }
            if !seen.insert(tool.name()) {
                return Err(MageError::Kit(format!("duplicate tool name: {}", tool.name())));
            }
        }

        Ok(Kit {
            name: self.name,
            tools: self.tools,
            declarations: OnceLock::new(),
            callback: self.callback,
        })
    }
}
