//! The top-level agent: a long-lived conversation that delegates work to mages through the
//! `task_mage` tool.
//!
//! Every call to [`Agent::send_message`] runs one turn on its own tokio task. Only one turn
//! may be in flight; interrupting it cancels that turn alone and leaves the agent ready for
//! the next message.
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::bounds::ProjectBounds;
use crate::conversation::Conversation;
use crate::errors::{MageError, MageResult};
use crate::kit::Kit;
use crate::mage::tasks::unified_mage_kit;
use crate::mage::{run_tool_loop, Portal, PortalConfig, ResultStrategy};
use crate::models::message::Message;
use crate::models::tool::ToolChoice;
use crate::prompt_template::Prompt;
use crate::providers::base::{Provider, RequestOptions};
use crate::providers::configs::ClientConfig;
use crate::providers::streaming::StreamChunk;

const STREAM_BUFFER: usize = 100;

/// Receives everything the agent produces. Called from the agent's background task.
pub trait Observer: Send + Sync {
    /// A piece of streamed model text
    fn on_chunk(&self, chunk: &str);

    fn on_error(&self, error: &str);

    /// The final reply of a turn
    fn on_complete(&self, message: &Message);

    fn on_usage(&self, _usage: &UsageStats) {}
}

/// Size and token accounting for the conversation after a completed turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    /// Approximate request payload size, padded by 20% for protocol overhead
    pub message_size_bytes: usize,
    pub model: String,
    /// The provider's total when reported, otherwise estimated at four bytes per token
    pub tokens_used: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl UsageStats {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let raw: usize = conversation.messages().iter().map(Message::size_bytes).sum();
        let message_size_bytes = raw * 12 / 10;

        let usage = conversation.last_usage();
        let reported = usage.map_or(0, |u| u.total_tokens as usize);
        Self {
            message_size_bytes,
            model: conversation.model().to_string(),
            tokens_used: if reported > 0 {
                reported
            } else {
                message_size_bytes / 4
            },
            prompt_tokens: usage.map_or(0, |u| u.prompt_tokens as usize),
            completion_tokens: usage.map_or(0, |u| u.completion_tokens as usize),
        }
    }
}

/// Agent configuration. Unset values fall back to the crate defaults.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub model: String,
    pub image_model: Option<String>,
    pub project_bounds: Vec<ProjectBounds>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_tool_rounds: Option<usize>,
    /// Extra instructions appended to the system prompt
    pub prompt_refinements: Vec<String>,
}

impl AgentConfig {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_project_bounds(mut self, bounds: Vec<ProjectBounds>) -> Self {
        self.project_bounds = bounds;
        self
    }

    pub fn with_refinement<S: Into<String>>(mut self, refinement: S) -> Self {
        self.prompt_refinements.push(refinement.into());
        self
    }

    fn portal_config(&self) -> PortalConfig {
        PortalConfig {
            primary_model: self.model.clone(),
            image_model: self.image_model.clone(),
            mini_model: None,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            project_bounds: self.project_bounds.clone(),
            max_tool_rounds: self.max_tool_rounds,
        }
    }
}

#[derive(Default)]
struct Control {
    root: Option<CancellationToken>,
    active: Option<CancellationToken>,
    generation: u64,
}

struct Inner {
    portal: Portal,
    kit: Kit,
    system_prompt: String,
    observer: Option<Arc<dyn Observer>>,
    conversation: Mutex<Conversation>,
    control: StdMutex<Control>,
}

#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    pub fn new(
        client: ClientConfig,
        config: AgentConfig,
        observer: Option<Arc<dyn Observer>>,
    ) -> MageResult<Self> {
        let portal = Portal::new(client, config.portal_config())?;
        Self::from_portal(portal, &config, observer)
    }

    /// Drive the agent and all of its mages through `provider`
    pub fn with_provider(
        provider: Arc<dyn Provider>,
        config: AgentConfig,
        observer: Option<Arc<dyn Observer>>,
    ) -> MageResult<Self> {
        let portal = Portal::with_provider(provider, config.portal_config());
        Self::from_portal(portal, &config, observer)
    }

    fn from_portal(
        portal: Portal,
        config: &AgentConfig,
        observer: Option<Arc<dyn Observer>>,
    ) -> MageResult<Self> {
        let kit = unified_mage_kit(portal.clone())?;
        let system_prompt = Prompt::AgentSystem.render(&json!({
            "projects": config.project_bounds,
            "refinements": config.prompt_refinements,
        }))?;
        let conversation = fresh_conversation(&portal, &kit, &system_prompt);

        Ok(Self {
            inner: Arc::new(Inner {
                portal,
                kit,
                system_prompt,
                observer,
                conversation: Mutex::new(conversation),
                control: StdMutex::new(Control::default()),
            }),
        })
    }

    /// Attach the agent to `parent`. Cancelling `parent` stops every later request.
    pub fn start(&self, parent: &CancellationToken) -> MageResult<()> {
        let mut control = self.inner.control();
        if control.root.as_ref().is_some_and(|root| !root.is_cancelled()) {
            return Err(MageError::AlreadyRunning);
        }
        control.root = Some(parent.child_token());
        info!("agent started");
        Ok(())
    }

    /// Cancel the session token, and with it any request in flight
    pub fn shutdown(&self) {
        let mut control = self.inner.control();
        if let Some(root) = control.root.take() {
            root.cancel();
        }
        control.active = None;
    }

    /// Start a turn in the background. Results arrive through the observer.
    pub fn send_message<S: Into<String>>(&self, text: S) -> MageResult<()> {
        let (cancel, generation) = {
            let mut control = self.inner.control();
            let root = control
                .root
                .as_ref()
                .filter(|root| !root.is_cancelled())
                .ok_or(MageError::NotStarted)?;
            if control.active.is_some() {
                return Err(MageError::Busy);
            }
            let cancel = root.child_token();
            control.generation += 1;
            control.active = Some(cancel.clone());
            (cancel, control.generation)
        };

        let inner = self.inner.clone();
        let text = text.into();
        tokio::spawn(async move {
            inner
                .run_turn(text, &cancel)
                .instrument(info_span!("agent", turn = generation))
                .await;
            inner.finish(generation);
        });
        Ok(())
    }

    /// Cancel the request in flight, if any. The session stays usable.
    pub fn interrupt_current_request(&self) {
        if let Some(active) = self.inner.control().active.take() {
            active.cancel();
            info!("request interrupted");
        }
    }

    /// Interrupt any request in flight, then start over from the system prompt
    pub async fn reset_conversation(&self) {
        self.interrupt_current_request();
        let mut conversation = self.inner.conversation.lock().await;
        *conversation = fresh_conversation(&self.inner.portal, &self.inner.kit, &self.inner.system_prompt);
        info!("conversation reset");
    }

    pub fn is_busy(&self) -> bool {
        self.inner.control().active.is_some()
    }

    /// A copy of the conversation log. Waits for any turn in flight to finish.
    pub async fn history(&self) -> Vec<Message> {
        self.inner.conversation.lock().await.messages().to_vec()
    }
}

fn fresh_conversation(portal: &Portal, kit: &Kit, system_prompt: &str) -> Conversation {
    let settings = portal.settings();
    let mut conversation = Conversation::new(settings.provider.clone(), settings.primary_model.clone())
        .with_tools(kit.get_tools().to_vec())
        .with_tool_choice(ToolChoice::Auto);
    conversation.add_system_message(system_prompt);
    conversation
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the in-flight marker unless a newer turn has already replaced it
    fn finish(&self, generation: u64) {
        let mut control = self.control();
        if control.generation == generation {
            control.active = None;
        }
    }

    /// Forward one request's text to the observer. Stream errors are left to the turn
    /// outcome, which reports each failure once.
    fn forward_stream(&self, mut receiver: mpsc::Receiver<StreamChunk>) -> JoinHandle<()> {
        let observer = self.observer.clone();
        tokio::spawn(async move {
            while let Some(chunk) = receiver.recv().await {
                let Some(observer) = &observer else { continue };
                if let StreamChunk::Content(text) = chunk {
                    observer.on_chunk(&text);
                }
            }
        })
    }

    async fn run_turn(&self, text: String, cancel: &CancellationToken) {
        let mut conversation = self.conversation.lock().await;
        conversation.add_user_message(text);

        let mut forwarders = Vec::new();
        let turn_options = || {
            let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
            forwarders.push(self.forward_stream(receiver));
            RequestOptions::new().with_stream(sender)
        };

        let mut result = String::new();
        let outcome = run_tool_loop(
            &mut conversation,
            &self.kit,
            ResultStrategy::Raw,
            &mut result,
            &self.portal.settings().loop_settings(),
            cancel,
            turn_options,
        )
        .await;

        // Every chunk reaches the observer before the turn is reported
        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        match outcome {
            Ok(message) => {
                info!(messages = conversation.len(), "request completed");
                if let Some(observer) = &self.observer {
                    observer.on_complete(&message);
                    observer.on_usage(&UsageStats::from_conversation(&conversation));
                }
            }
            Err(MageError::Cancelled) => info!("request cancelled"),
            Err(err) => {
                error!(error = %err, "request failed");
                if let Some(observer) = &self.observer {
                    observer.on_error(&err.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use crate::models::message::Role;
    use crate::providers::mock::{tool_call_message, MockProvider, MockReply};
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    #[derive(Debug, PartialEq)]
    enum Event {
        Chunk(String),
        Error(String),
        Complete(Option<String>),
        Usage(UsageStats),
    }

    struct ChannelObserver(UnboundedSender<Event>);

    impl Observer for ChannelObserver {
        fn on_chunk(&self, chunk: &str) {
            let _ = self.0.send(Event::Chunk(chunk.to_string()));
        }

        fn on_error(&self, error: &str) {
            let _ = self.0.send(Event::Error(error.to_string()));
        }

        fn on_complete(&self, message: &Message) {
            let _ = self.0.send(Event::Complete(message.text().map(str::to_string)));
        }

        fn on_usage(&self, usage: &UsageStats) {
            let _ = self.0.send(Event::Usage(usage.clone()));
        }
    }

    fn agent(provider: &MockProvider) -> (Agent, UnboundedReceiver<Event>) {
        let (tx, rx) = unbounded_channel();
        let agent = Agent::with_provider(
            Arc::new(provider.clone()),
            AgentConfig::new("grok-4").with_refinement("Answer in haiku."),
            Some(Arc::new(ChannelObserver(tx))),
        )
        .unwrap();
        (agent, rx)
    }

    async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("observer channel closed")
    }

    async fn wait_idle(agent: &Agent) {
        for _ in 0..500 {
            if !agent.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("agent never went idle");
    }

    #[tokio::test]
    async fn test_send_streams_and_completes() {
        let provider = MockProvider::new(vec![Message::assistant("Hello!")]);
        let (agent, mut rx) = agent(&provider);
        agent.start(&CancellationToken::new()).unwrap();

        agent.send_message("hi").unwrap();
        assert_eq!(next_event(&mut rx).await, Event::Chunk("Hello!".into()));
        assert_eq!(next_event(&mut rx).await, Event::Complete(Some("Hello!".into())));
        let Event::Usage(usage) = next_event(&mut rx).await else {
            panic!("expected usage");
        };
        assert_eq!(usage.tokens_used, 15);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.model, "grok-4");
        wait_idle(&agent).await;

        let request = &provider.requests()[0];
        assert!(request.stream);
        assert_eq!(request.tools[0].name(), "task_mage");
        let system = request.messages[0].text().unwrap();
        assert!(system.contains("task_mage"));
        assert!(system.contains("# Further Instructions/ Refinements to instructions\nAnswer in haiku."));
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let provider = MockProvider::new(Vec::<Message>::new());
        let (agent, _rx) = agent(&provider);

        assert!(matches!(agent.send_message("hi"), Err(MageError::NotStarted)));

        let parent = CancellationToken::new();
        agent.start(&parent).unwrap();
        assert!(matches!(agent.start(&parent), Err(MageError::AlreadyRunning)));

        parent.cancel();
        assert!(matches!(agent.send_message("hi"), Err(MageError::NotStarted)));
        agent.start(&CancellationToken::new()).unwrap();
    }

    #[tokio::test]
    async fn test_busy_then_interrupt_then_send_again() {
        let provider = MockProvider::new(vec![MockReply::Hang, Message::assistant("after").into()]);
        let (agent, mut rx) = agent(&provider);
        agent.start(&CancellationToken::new()).unwrap();

        agent.send_message("one").unwrap();
        while provider.request_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(agent.is_busy());
        assert!(matches!(agent.send_message("two"), Err(MageError::Busy)));

        agent.interrupt_current_request();
        assert!(!agent.is_busy());

        agent.send_message("three").unwrap();
        // No error is reported for the interrupted turn
        assert_eq!(next_event(&mut rx).await, Event::Chunk("after".into()));
        assert_eq!(next_event(&mut rx).await, Event::Complete(Some("after".into())));
        wait_idle(&agent).await;

        let users: Vec<String> = agent
            .history()
            .await
            .iter()
            .filter(|m| m.role == Role::User)
            .filter_map(|m| m.text().map(str::to_string))
            .collect();
        assert_eq!(users, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn test_unknown_mage_type_is_fed_back() {
        let provider = MockProvider::new(vec![
            tool_call_message("c1", "task_mage", r#"{"mage_type":"web","command":"browse"}"#),
            Message::assistant("I cannot browse."),
        ]);
        let (agent, mut rx) = agent(&provider);
        agent.start(&CancellationToken::new()).unwrap();

        agent.send_message("open example.com").unwrap();
        assert_eq!(next_event(&mut rx).await, Event::Chunk("I cannot browse.".into()));
        assert_eq!(
            next_event(&mut rx).await,
            Event::Complete(Some("I cannot browse.".into()))
        );

        let second = &provider.requests()[1];
        let tool_result = second.messages.last().unwrap();
        assert_eq!(tool_result.role, Role::Tool);
        assert_eq!(tool_result.tool_call_id.as_deref(), Some("c1"));
        assert!(tool_result
            .text()
            .unwrap()
            .starts_with("Error: Invalid parameters: unknown mage type: web"));
    }

    #[tokio::test]
    async fn test_provider_failure_reaches_observer() {
        let provider = MockProvider::new(vec![MockReply::Error(ClientError::NoResponseChoices)]);
        let (agent, mut rx) = agent(&provider);
        agent.start(&CancellationToken::new()).unwrap();

        agent.send_message("hi").unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            Event::Error("failed to get response: no response choices returned".into())
        );
        wait_idle(&agent).await;
        // The stream saw the failure too, but it is reported only once
        assert!(rx.try_recv().is_err());
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_keeps_only_system_prompt() {
        let provider = MockProvider::new(vec![Message::assistant("one")]);
        let (agent, mut rx) = agent(&provider);
        agent.start(&CancellationToken::new()).unwrap();

        agent.send_message("hi").unwrap();
        assert_eq!(next_event(&mut rx).await, Event::Chunk("one".into()));
        wait_idle(&agent).await;
        assert_eq!(agent.history().await.len(), 3);

        agent.reset_conversation().await;
        let history = agent.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
    }

    #[test]
    fn test_usage_estimate_without_provider_totals() {
        let provider = MockProvider::new(Vec::<Message>::new());
        let mut conversation = Conversation::new(Arc::new(provider), "m");
        conversation.add_user_message("x".repeat(96));

        let stats = UsageStats::from_conversation(&conversation);
        // (96 + "user") * 1.2
        assert_eq!(stats.message_size_bytes, 120);
        assert_eq!(stats.tokens_used, 30);
        assert_eq!(stats.prompt_tokens, 0);
    }
}
