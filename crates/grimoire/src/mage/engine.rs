use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::portal::PortalSettings;
use super::Mage;
use crate::conversation::Conversation;
use crate::errors::{MageError, MageResult};
use crate::kit::{Kit, ToolOutcome, ToolOutput};
use crate::models::message::Message;
use crate::models::tool::ToolChoice;
use crate::providers::base::RequestOptions;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

const TOOL_LOOP_LIMIT_RESULT: &str = "Error: tool loop limit reached";

/// How tool outcomes are written back into the conversation and the accumulated result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStrategy {
    /// Outputs are recorded verbatim; failures are answered with `Error: <msg>` but not accumulated
    Raw,
    /// Command results are rendered as stdout/stderr/exit code, one entry per line, failures included
    CommandOutput,
}

impl ResultStrategy {
    /// The tool-result message text, and what (if anything) to append to the result buffer
    pub fn record(&self, outcome: &ToolOutcome) -> (String, Option<String>) {
        match (self, &outcome.result) {
            (ResultStrategy::Raw, Ok(output)) => {
                let text = output.to_string();
                (text.clone(), Some(text))
            }
            (ResultStrategy::Raw, Err(_)) => (outcome.content(), None),
            (ResultStrategy::CommandOutput, Ok(output)) => {
                let text = format_command_output(output);
                (text.clone(), Some(format!("{}\n", text)))
            }
            (ResultStrategy::CommandOutput, Err(_)) => {
                let text = outcome.content();
                (text.clone(), Some(format!("{}\n", text)))
            }
        }
    }
}

fn format_command_output(output: &ToolOutput) -> String {
    let ToolOutput::Structured(map) = output else {
        return output.to_string();
    };

    match map.get("stdout").and_then(Value::as_str) {
        Some(stdout) => {
            let mut text = stdout.to_string();
            if let Some(stderr) = map.get("stderr").and_then(Value::as_str).filter(|s| !s.is_empty()) {
                text.push_str("\nStderr: ");
                text.push_str(stderr);
            }
            if let Some(code) = map.get("exit_code").and_then(Value::as_i64).filter(|c| *c != 0) {
                text.push_str(&format!("\nExit code: {}", code));
            }
            text
        }
        None => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}: {}", key, s),
                other => format!("{}: {}", key, other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// `None` lets the model request tools indefinitely
    pub max_tool_rounds: Option<usize>,
}

/// Drive `conversation` until the model answers without requesting tools.
///
/// Each turn sends the full history; tool calls in the reply are dispatched through
/// `kit` and answered in order before the next send. `turn_options` is consulted once
/// per send, which lets callers attach a fresh streaming sink to every request. The
/// final plain-text reply is appended to `result` and returned.
pub async fn run_tool_loop<F>(
    conversation: &mut Conversation,
    kit: &Kit,
    strategy: ResultStrategy,
    result: &mut String,
    settings: &LoopSettings,
    cancel: &CancellationToken,
    mut turn_options: F,
) -> MageResult<Message>
where
    F: FnMut() -> RequestOptions + Send,
{
    let mut rounds = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(MageError::Cancelled);
        }

        let reply = match conversation
            .send(cancel, settings.temperature, settings.max_tokens, turn_options())
            .await
        {
            Ok(reply) => reply,
            Err(err) if err.is_cancelled() || cancel.is_cancelled() => {
                return Err(MageError::Cancelled)
            }
            Err(err) => return Err(MageError::Response(err)),
        };

        if !reply.has_tool_calls() {
            let text = reply.text().ok_or(MageError::NonTextContent)?;
            result.push_str(text);
            return Ok(reply);
        }

        if let Some(max) = settings.max_tool_rounds {
            if rounds >= max {
                warn!(max, "model kept requesting tools, giving up");
                // Answer the pending calls so the log stays replayable
                for call in &reply.tool_calls {
                    conversation.add_tool_result(call.id.clone(), TOOL_LOOP_LIMIT_RESULT);
                }
                return Err(MageError::ToolLoopExceeded(max));
            }
        }

        info!(count = reply.tool_calls.len(), round = rounds + 1, "found tool calls");
        for outcome in kit.dispatch(&reply.tool_calls).await {
            let (content, accumulated) = strategy.record(&outcome);
            conversation.add_tool_result(outcome.id, content);
            if let Some(accumulated) = accumulated {
                result.push_str(&accumulated);
            }
        }
        rounds += 1;
    }
}

/// What distinguishes one kind of mage from another
pub trait MageProfile: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// System messages placed ahead of every command
    fn preamble(&self, settings: &PortalSettings) -> MageResult<Vec<String>>;

    fn build_kit(&self, settings: &PortalSettings) -> MageResult<Kit>;

    fn result_strategy(&self) -> ResultStrategy {
        ResultStrategy::Raw
    }

    /// Whether the result buffer starts empty on every execution rather than growing across them
    fn clears_result_each_execution(&self) -> bool {
        false
    }
}

struct MageState {
    conversation: Conversation,
    context_messages: Vec<String>,
    result: String,
}

/// A mage: one conversation, one kit, one profile, guarded against concurrent use
pub struct MageEngine<P> {
    profile: P,
    settings: Arc<PortalSettings>,
    kit: Kit,
    state: Mutex<MageState>,
}

impl<P: MageProfile> MageEngine<P> {
    pub fn new(profile: P, settings: Arc<PortalSettings>) -> MageResult<Self> {
        let kit = profile.build_kit(&settings)?;
        let conversation = fresh_conversation(&settings, &kit);
        Ok(Self {
            profile,
            settings,
            kit,
            state: Mutex::new(MageState {
                conversation,
                context_messages: Vec::new(),
                result: String::new(),
            }),
        })
    }

    fn lock(&self) -> MageResult<MutexGuard<'_, MageState>> {
        self.state.try_lock().map_err(|_| MageError::Busy)
    }

    /// Number of messages currently in the conversation
    pub async fn history_len(&self) -> MageResult<usize> {
        Ok(self.lock()?.conversation.len())
    }

    pub fn kit(&self) -> &Kit {
        &self.kit
    }

    async fn run(&self, cancel: &CancellationToken, command: &str) -> MageResult<String> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        if self.profile.clears_result_each_execution() {
            state.result.clear();
        }

        for message in self.profile.preamble(&self.settings)? {
            state.conversation.add_system_message(message);
        }
        for message in &state.context_messages {
            state.conversation.add_system_message(message.clone());
        }
        state.conversation.add_user_message(command);

        run_tool_loop(
            &mut state.conversation,
            &self.kit,
            self.profile.result_strategy(),
            &mut state.result,
            &self.settings.loop_settings(),
            cancel,
            RequestOptions::new,
        )
        .await?;

        Ok(state.result.clone())
    }
}

fn fresh_conversation(settings: &PortalSettings, kit: &Kit) -> Conversation {
    Conversation::new(settings.provider.clone(), settings.primary_model.clone())
        .with_tools(kit.get_tools().to_vec())
        .with_tool_choice(ToolChoice::Auto)
}

#[async_trait]
impl<P: MageProfile> Mage for MageEngine<P> {
    fn name(&self) -> &str {
        self.profile.name()
    }

    async fn reset(&self) -> MageResult<()> {
        let mut state = self.lock()?;
        state.conversation = fresh_conversation(&self.settings, &self.kit);
        state.context_messages.clear();
        state.result.clear();
        Ok(())
    }

    async fn add_to_context(&self, context: &str) -> MageResult<()> {
        self.lock()?.context_messages.push(context.to_string());
        Ok(())
    }

    async fn execute(&self, cancel: &CancellationToken, command: &str) -> MageResult<String> {
        self.run(cancel, command)
            .instrument(info_span!("mage", kind = self.profile.name()))
            .await
    }
}
