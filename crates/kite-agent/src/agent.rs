//! The agent loop: stream a turn, dispatch tools, repeat until the model answers

use std::sync::Arc;

use futures::StreamExt;
use kite_ai::{ChatRequest, Message, ModelClient, StreamEvent, ToolCall, ToolCallAccumulator, Usage, complete_text};

use crate::{
    approval::ApprovalManager,
    compaction::{self, CompactionSummary},
    config::AgentConfig,
    context::ContextManager,
    error::Result,
    events::{AgentEvent, EventSink, RunOutcome},
    hooks::{HookContext, HookTrigger, Hooks, NoHooks},
    loop_detector::{LOOP_BREAKER_PROMPT, LoopDetector, action_signature},
    registry::{Confirmer, DispatchContext, ToolRegistry},
    session::{Session, SessionSnapshot},
    tokens::TokenCounter,
    transport::is_context_overflow,
};

const PLANNING_PROMPT: &str = "Before taking any action, write a short bullet-point plan \
(at most seven bullets) for handling the request above. Reply with the plan only.";

/// Tool result used for calls left unexecuted when the run is cancelled
const SKIPPED_RESULT: &str = "Skipped: the run was cancelled before this tool call executed.";

/// Output of one streamed model turn
struct TurnOutput {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

/// A turn whose stream failed
struct TurnFailure {
    error: String,
    /// Text streamed before the failure
    partial_text: String,
}

/// Drives one conversation against a model and a set of tools
pub struct Agent {
    config: AgentConfig,
    session: Session,
    loop_detector: LoopDetector,
    registry: Arc<ToolRegistry>,
    client: Arc<dyn ModelClient>,
    hooks: Arc<dyn Hooks>,
    approval: Option<ApprovalManager>,
    confirmer: Option<Arc<dyn Confirmer>>,
}

impl Agent {
    /// Create an agent with a fresh session
    pub fn new(config: AgentConfig, client: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>) -> Self {
        let mut context = ContextManager::new(TokenCounter::for_model(&config.model.id));
        context.set_system_prompt(config.system_prompt.clone());
        let approval = ApprovalManager::new(config.approval_policy, config.working_dir.clone());
        Self {
            session: Session::new(context),
            loop_detector: LoopDetector::new(),
            registry,
            client,
            hooks: Arc::new(NoHooks),
            approval: Some(approval),
            confirmer: None,
            config,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Run tools without consulting the approval manager
    pub fn without_approval(mut self) -> Self {
        self.approval = None;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn context(&self) -> &ContextManager {
        self.session.context()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Replace the current session with a saved one
    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        let counter = self.session.context().counter();
        self.session = Session::restore(snapshot, self.config.system_prompt.clone(), counter);
        self.loop_detector.clear();
    }

    /// Start a new, empty session
    pub fn clear(&mut self) {
        let mut context = ContextManager::new(self.session.context().counter());
        context.set_system_prompt(self.config.system_prompt.clone());
        self.session = Session::new(context);
        self.loop_detector.clear();
    }

    /// Summarize the history now, regardless of its size
    pub async fn compact(&mut self) -> Result<CompactionSummary> {
        compaction::compact(self.session.context_mut(), self.client.as_ref()).await
    }

    /// Process one user message until the model answers, the turn cap is
    /// hit, the stream fails, or the receiver of `events` is dropped.
    ///
    /// `AgentEnd` is the last event unless the run was cancelled.
    pub async fn prompt(&mut self, input: &str, events: &EventSink) -> RunOutcome {
        self.loop_detector.clear();
        events.emit(AgentEvent::AgentStart).await;

        let cwd = self.config.working_dir.clone();
        self.hooks
            .fire(&HookContext::new(HookTrigger::BeforeAgent, &cwd).with_user_message(input))
            .await;

        self.session.context_mut().add_user_message(input);
        self.session.touch();

        if self.config.autoplan {
            self.plan(events).await;
        }

        let mut run_usage = Usage::default();
        let outcome = self.run_loop(events, &mut run_usage).await;

        match &outcome {
            RunOutcome::Cancelled => {
                tracing::info!("Run cancelled by consumer");
                return outcome;
            }
            RunOutcome::Completed { text } => {
                self.hooks
                    .fire(
                        &HookContext::new(HookTrigger::AfterAgent, &cwd)
                            .with_user_message(input)
                            .with_response(text.as_str()),
                    )
                    .await;
            }
            RunOutcome::LimitReached { .. } | RunOutcome::Failed { .. } => {
                self.hooks
                    .fire(&HookContext::new(HookTrigger::AfterAgent, &cwd).with_user_message(input))
                    .await;
            }
        }

        events
            .emit(AgentEvent::AgentEnd {
                outcome: outcome.clone(),
                usage: run_usage,
            })
            .await;
        outcome
    }

    async fn run_loop(&mut self, events: &EventSink, run_usage: &mut Usage) -> RunOutcome {
        let max_turns = self.config.max_turns;
        let mut turn: u32 = 0;
        let mut overflow_recovered = false;

        loop {
            if events.is_closed() {
                return RunOutcome::Cancelled;
            }

            turn += 1;
            if turn > max_turns {
                tracing::warn!(max_turns, "Turn limit reached");
                events.emit(AgentEvent::LimitReached { max_turns }).await;
                self.fire_error(&format!("Reached the maximum of {} turns", max_turns))
                    .await;
                return RunOutcome::LimitReached { max_turns };
            }

            events.emit(AgentEvent::TurnStart { turn }).await;
            self.session.record_turn();

            if self
                .session
                .context()
                .needs_compression(self.config.model.context_window)
            {
                self.try_compact(events).await;
            }

            let output = match self.stream_turn(events).await {
                Ok(output) => output,
                Err(failure) => {
                    if !overflow_recovered && is_context_overflow(&failure.error) {
                        overflow_recovered = true;
                        tracing::warn!("Context overflow, compacting and retrying: {}", failure.error);
                        if self.try_compact(events).await {
                            continue;
                        }
                    }
                    if !failure.partial_text.is_empty() {
                        self.session
                            .context_mut()
                            .add_assistant_message(Some(failure.partial_text), vec![]);
                    }
                    events
                        .emit(AgentEvent::Error {
                            message: failure.error.clone(),
                        })
                        .await;
                    self.fire_error(&failure.error).await;
                    return RunOutcome::Failed {
                        error: failure.error,
                    };
                }
            };

            let TurnOutput {
                text,
                tool_calls,
                usage,
            } = output;

            // Partial calls from an abandoned stream are never dispatched
            if events.is_closed() {
                if !text.is_empty() {
                    self.session.context_mut().add_assistant_message(Some(text), vec![]);
                }
                return RunOutcome::Cancelled;
            }

            let usage = usage.unwrap_or_default();
            let content = (!text.is_empty()).then(|| text.clone());
            self.session
                .context_mut()
                .add_assistant_message(content, tool_calls.clone());

            if tool_calls.is_empty() {
                self.finish_turn(turn, &usage, run_usage, events).await;
                return RunOutcome::Completed { text };
            }

            let results = self.dispatch_tools(&tool_calls, events).await;
            let cancelled = results.len() < tool_calls.len() || events.is_closed();
            let results = self.fill_skipped(&tool_calls, results);
            for message in results {
                self.session.context_mut().append(message);
            }
            if cancelled {
                return RunOutcome::Cancelled;
            }

            if let Some(kind) = self.loop_detector.check() {
                tracing::warn!("Loop detected: {}", kind);
                events
                    .emit(AgentEvent::LoopDetected {
                        description: kind.to_string(),
                    })
                    .await;
                self.session.context_mut().add_user_message(LOOP_BREAKER_PROMPT);
                // Start fresh so one loop produces one nudge
                self.loop_detector.clear();
            }

            self.finish_turn(turn, &usage, run_usage, events).await;
        }
    }

    /// Usage accounting, `TurnEnd`, then pruning
    async fn finish_turn(&mut self, turn: u32, usage: &Usage, run_usage: &mut Usage, events: &EventSink) {
        self.session.context_mut().record_usage(usage);
        run_usage.add(usage);
        events
            .emit(AgentEvent::TurnEnd {
                turn,
                usage: *usage,
            })
            .await;
        self.session.context_mut().prune_tool_outputs();
    }

    /// Send the history to the model and forward the stream as events
    async fn stream_turn(&self, events: &EventSink) -> std::result::Result<TurnOutput, TurnFailure> {
        let request = ChatRequest {
            messages: self.session.context().request_messages(),
            tools: None,
            max_tokens: self.config.max_tokens,
        }
        .with_tools(self.registry.schemas());

        let mut stream = self
            .client
            .chat_completion(request)
            .await
            .map_err(|e| TurnFailure {
                error: e.to_string(),
                partial_text: String::new(),
            })?;

        let mut text = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut usage = None;
        let mut terminated = false;

        while let Some(event) = stream.next().await {
            if events.is_closed() {
                tracing::debug!("Consumer gone, abandoning model stream");
                break;
            }
            accumulator.process_event(&event);
            match event {
                StreamEvent::TextDelta { content } => {
                    text.push_str(&content);
                    events.emit(AgentEvent::TextDelta { content }).await;
                }
                StreamEvent::ToolCallStart { call_id, name } => {
                    events
                        .emit(AgentEvent::ToolCallPending { call_id, name })
                        .await;
                }
                StreamEvent::ToolCallDelta {
                    call_id,
                    arguments_delta,
                } => {
                    events
                        .emit(AgentEvent::ToolCallArguments {
                            call_id,
                            delta: arguments_delta,
                        })
                        .await;
                }
                StreamEvent::ToolCallComplete { .. } => {}
                StreamEvent::MessageComplete {
                    finish_reason,
                    usage: reported,
                } => {
                    tracing::debug!(?finish_reason, ?reported, "Model turn complete");
                    usage = reported;
                    terminated = true;
                    break;
                }
                StreamEvent::Error { message } => {
                    return Err(TurnFailure {
                        error: message,
                        partial_text: text,
                    });
                }
            }
        }

        if !terminated {
            tracing::warn!("Model stream ended without a completion event");
        }

        Ok(TurnOutput {
            text,
            tool_calls: accumulator.finish(),
            usage,
        })
    }

    /// Run the calls in order, stopping early if the consumer goes away.
    /// Returns one tool message per executed call.
    async fn dispatch_tools(&mut self, calls: &[ToolCall], events: &EventSink) -> Vec<Message> {
        let ctx = DispatchContext {
            cwd: &self.config.working_dir,
            hooks: &self.hooks,
            approval: self.approval.as_ref(),
            confirmer: self.confirmer.as_ref(),
        };
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            if events.is_closed() {
                break;
            }

            events
                .emit(AgentEvent::ToolCallStarted {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
            self.loop_detector
                .record(action_signature(&call.name, &call.arguments));

            let result = self.registry.invoke(call, &ctx).await;
            results.push(Message::tool_result(
                &call.id,
                &call.name,
                result.to_model_content(),
            ));

            events
                .emit(AgentEvent::ToolCallCompleted {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    result,
                })
                .await;
        }

        results
    }

    /// Give every unexecuted call a result so each request keeps its answer
    fn fill_skipped(&self, calls: &[ToolCall], mut results: Vec<Message>) -> Vec<Message> {
        for call in &calls[results.len()..] {
            results.push(Message::tool_result(&call.id, &call.name, SKIPPED_RESULT));
        }
        results
    }

    /// Compact, absorbing failures. Returns whether the history was replaced.
    async fn try_compact(&mut self, events: &EventSink) -> bool {
        match compaction::compact(self.session.context_mut(), self.client.as_ref()).await {
            Ok(summary) => {
                events
                    .emit(AgentEvent::Compacted {
                        tokens_before: summary.tokens_before,
                        tokens_after: summary.tokens_after,
                    })
                    .await;
                true
            }
            Err(e) => {
                tracing::warn!("Compaction skipped: {}", e);
                false
            }
        }
    }

    /// Ask for a short plan before the first turn; failures are skipped
    async fn plan(&mut self, events: &EventSink) {
        let mut messages = self.session.context().request_messages();
        messages.push(Message::user(PLANNING_PROMPT));
        let request = ChatRequest {
            messages,
            tools: None,
            max_tokens: self.config.max_tokens,
        };

        match complete_text(self.client.as_ref(), request).await {
            Ok(plan) => {
                self.session
                    .context_mut()
                    .add_assistant_message(Some(plan.clone()), vec![]);
                events.emit(AgentEvent::PlanReady { text: plan }).await;
            }
            Err(e) => tracing::warn!("Planning request failed, continuing without a plan: {}", e),
        }
    }

    async fn fire_error(&self, error: &str) {
        self.hooks
            .fire(&HookContext::new(HookTrigger::OnError, &self.config.working_dir).with_error(error))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolError, ToolResult};
    use async_trait::async_trait;
    use kite_ai::{EventStream, Model, Provider, Role};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// One scripted model response
    enum Reply {
        Text(&'static str),
        Calls(Vec<(&'static str, &'static str, serde_json::Value)>),
        Fail(&'static str),
    }

    struct MockClient {
        model: Model,
        replies: Mutex<VecDeque<Reply>>,
        requests: AtomicUsize,
        /// Repeat the last reply forever once the script runs out
        repeat_last: Option<Vec<(&'static str, &'static str, serde_json::Value)>>,
    }

    impl MockClient {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                model: Model::for_provider(Provider::OpenAI, "gpt-4o"),
                replies: Mutex::new(replies.into()),
                requests: AtomicUsize::new(0),
                repeat_last: None,
            })
        }

        fn always_calling(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                model: Model::for_provider(Provider::OpenAI, "gpt-4o"),
                replies: Mutex::new(VecDeque::new()),
                requests: AtomicUsize::new(0),
                repeat_last: Some(vec![("c1", name, json!({"text": "again"}))]),
            })
        }

        fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelClient for MockClient {
        fn model(&self) -> &Model {
            &self.model
        }

        async fn chat_completion(&self, _request: ChatRequest) -> kite_ai::Result<EventStream> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().pop_front().unwrap_or_else(|| match &self.repeat_last {
                Some(calls) => Reply::Calls(calls.clone()),
                None => Reply::Text("done"),
            });

            Ok(Box::pin(async_stream::stream! {
                match reply {
                    Reply::Text(text) => {
                        yield StreamEvent::TextDelta { content: text.to_string() };
                        yield StreamEvent::MessageComplete {
                            finish_reason: Some("stop".into()),
                            usage: Some(Usage::new(100, 10)),
                        };
                    }
                    Reply::Calls(calls) => {
                        for (id, name, args) in calls {
                            yield StreamEvent::ToolCallStart { call_id: id.into(), name: name.into() };
                            yield StreamEvent::ToolCallDelta { call_id: id.into(), arguments_delta: args.to_string() };
                            yield StreamEvent::ToolCallComplete { call_id: id.into(), name: name.into(), arguments: args };
                        }
                        yield StreamEvent::MessageComplete {
                            finish_reason: Some("tool_calls".into()),
                            usage: Some(Usage::new(100, 10)),
                        };
                    }
                    Reply::Fail(message) => {
                        yield StreamEvent::TextDelta { content: "partial".into() };
                        yield StreamEvent::error(message);
                    }
                }
            }))
        }
    }

    struct EchoTool {
        calls: Arc<AtomicUsize>,
        /// Receiver dropped on first execution, to simulate the consumer leaving
        drop_on_run: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                drop_on_run: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo text back"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        async fn execute(&self, params: serde_json::Value, _cwd: &Path) -> std::result::Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            drop(self.drop_on_run.lock().take());
            Ok(ToolResult::success(params["text"].as_str().unwrap_or_default()))
        }
    }

    fn agent_with(client: Arc<MockClient>, tool: EchoTool) -> Agent {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool));
        let config = AgentConfig::new(client.model().clone(), std::env::temp_dir())
            .with_system_prompt("You are a test agent");
        Agent::new(config, client, Arc::new(registry))
    }

    async fn run(agent: &mut Agent, input: &str) -> (RunOutcome, Vec<AgentEvent>) {
        let (sink, mut rx) = EventSink::channel(64);
        let collect = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        let drive = async move {
            let outcome = agent.prompt(input, &sink).await;
            drop(sink);
            outcome
        };
        tokio::join!(drive, collect)
    }

    #[tokio::test]
    async fn test_text_only_completion() {
        let client = MockClient::new(vec![Reply::Text("Hello!")]);
        let mut agent = agent_with(client.clone(), EchoTool::new());

        let (outcome, events) = run(&mut agent, "hi").await;
        assert_eq!(outcome, RunOutcome::Completed { text: "Hello!".into() });
        assert_eq!(events[0], AgentEvent::AgentStart);
        assert_eq!(events[1], AgentEvent::TurnStart { turn: 1 });
        assert!(events.last().unwrap().is_terminal());

        let messages = agent.context().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].tool_calls.is_none());
        assert_eq!(client.requests(), 1);
    }

    #[tokio::test]
    async fn test_tool_calls_dispatched_in_order() {
        let client = MockClient::new(vec![
            Reply::Calls(vec![
                ("c1", "echo", json!({"text": "one"})),
                ("c2", "echo", json!({"text": "two"})),
            ]),
            Reply::Text("All done"),
        ]);
        let tool = EchoTool::new();
        let calls = tool.calls.clone();
        let mut agent = agent_with(client, tool);

        let (outcome, events) = run(&mut agent, "echo twice").await;
        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let started: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolCallStarted { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["c1", "c2"]);

        let roles: Vec<_> = agent.context().messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        let tool_ids: Vec<_> = agent
            .context()
            .messages()
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["c1", "c2"]);
        assert_eq!(agent.context().messages()[2].text(), "one");
    }

    #[tokio::test]
    async fn test_turn_cap() {
        let client = MockClient::always_calling("echo");
        let mut agent = agent_with(client.clone(), EchoTool::new());
        agent.config.max_turns = 1;

        let (outcome, events) = run(&mut agent, "loop forever").await;
        assert_eq!(outcome, RunOutcome::LimitReached { max_turns: 1 });
        assert_eq!(client.requests(), 1);
        assert!(events.contains(&AgentEvent::LimitReached { max_turns: 1 }));
        assert!(matches!(
            events.last(),
            Some(AgentEvent::AgentEnd { outcome: RunOutcome::LimitReached { .. }, .. })
        ));
    }

    #[tokio::test]
    async fn test_loop_breaker_injected() {
        let same = || Reply::Calls(vec![("c", "echo", json!({"text": "same"}))]);
        let client = MockClient::new(vec![same(), same(), same(), Reply::Text("ok, stopping")]);
        let mut agent = agent_with(client, EchoTool::new());

        let (outcome, events) = run(&mut agent, "go").await;
        assert!(outcome.is_success());
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, AgentEvent::LoopDetected { .. }))
                .count(),
            1
        );
        assert!(
            agent
                .context()
                .messages()
                .iter()
                .any(|m| m.role == Role::User && m.text() == LOOP_BREAKER_PROMPT)
        );
    }

    #[tokio::test]
    async fn test_stream_error_fails_run() {
        let client = MockClient::new(vec![Reply::Fail("invalid request")]);
        let mut agent = agent_with(client, EchoTool::new());

        let (outcome, events) = run(&mut agent, "hi").await;
        assert_eq!(outcome, RunOutcome::Failed { error: "invalid request".into() });
        assert!(events.contains(&AgentEvent::Error { message: "invalid request".into() }));
        assert!(events.last().unwrap().is_terminal());
        // Partial text is kept, with no tool calls
        let last = agent.context().messages().last().unwrap();
        assert_eq!(last.text(), "partial");
        assert!(last.tool_calls.is_none());
    }

    #[tokio::test]
    async fn test_overflow_compacts_and_retries() {
        let client = MockClient::new(vec![
            Reply::Fail("prompt is too long: 210000 tokens"),
            Reply::Text("summary of work"),
            Reply::Text("continued"),
        ]);
        let mut agent = agent_with(client.clone(), EchoTool::new());

        let (outcome, events) = run(&mut agent, "big task").await;
        assert_eq!(outcome, RunOutcome::Completed { text: "continued".into() });
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Compacted { .. })));
        assert_eq!(client.requests(), 3);
        assert!(agent.context().messages()[0].text().contains("summary of work"));
    }

    #[tokio::test]
    async fn test_proactive_compaction() {
        let client = MockClient::new(vec![Reply::Text("short summary"), Reply::Text("answer")]);
        let mut agent = agent_with(client, EchoTool::new());
        agent.config.model.context_window = 1000;

        let (outcome, events) = run(&mut agent, &"x".repeat(8000)).await;
        assert!(outcome.is_success());
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Compacted { .. })));
        // Three restoration messages plus the answer
        assert_eq!(agent.context().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_compaction_is_skipped() {
        let client = MockClient::new(vec![Reply::Fail("summarizer down"), Reply::Text("answer")]);
        let mut agent = agent_with(client, EchoTool::new());
        agent.config.model.context_window = 1000;

        let (outcome, events) = run(&mut agent, &"x".repeat(8000)).await;
        assert!(outcome.is_success());
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::Compacted { .. })));
        assert_eq!(agent.context().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_turn() {
        let client = MockClient::new(vec![Reply::Text("never sent")]);
        let mut agent = agent_with(client.clone(), EchoTool::new());

        let (sink, rx) = EventSink::channel(64);
        drop(rx);
        let outcome = agent.prompt("hi", &sink).await;
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(client.requests(), 0);
        assert_eq!(agent.context().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_between_tool_calls() {
        let client = MockClient::new(vec![Reply::Calls(vec![
            ("c1", "echo", json!({"text": "one"})),
            ("c2", "echo", json!({"text": "two"})),
        ])]);
        let tool = EchoTool::new();
        let calls = tool.calls.clone();
        let (sink, rx) = EventSink::channel(64);
        *tool.drop_on_run.lock() = Some(rx);
        let mut agent = agent_with(client, tool);

        let outcome = agent.prompt("go", &sink).await;
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let messages = agent.context().messages();
        let results: Vec<_> = messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text(), "one");
        assert_eq!(results[1].text(), SKIPPED_RESULT);
    }

    /// Streams text until the consumer goes away
    struct EndlessClient {
        model: Model,
        yielded: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelClient for EndlessClient {
        fn model(&self) -> &Model {
            &self.model
        }

        async fn chat_completion(&self, _request: ChatRequest) -> kite_ai::Result<EventStream> {
            let yielded = self.yielded.clone();
            Ok(Box::pin(async_stream::stream! {
                for _ in 0..10_000 {
                    yielded.fetch_add(1, Ordering::SeqCst);
                    yield StreamEvent::TextDelta { content: "word ".into() };
                }
                yield StreamEvent::MessageComplete { finish_reason: Some("stop".into()), usage: None };
            }))
        }
    }

    #[tokio::test]
    async fn test_cancelled_mid_stream_stops_reading() {
        let yielded = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(EndlessClient {
            model: Model::for_provider(Provider::OpenAI, "gpt-4o"),
            yielded: yielded.clone(),
        });
        let config = AgentConfig::new(client.model().clone(), std::env::temp_dir());
        let mut agent = Agent::new(config, client, Arc::new(ToolRegistry::new()));

        let (sink, mut rx) = EventSink::channel(8);
        let consumer = async move {
            while let Some(event) = rx.recv().await {
                if matches!(event, AgentEvent::TextDelta { .. }) {
                    break;
                }
            }
        };
        let (outcome, ()) = tokio::join!(agent.prompt("talk", &sink), consumer);

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(yielded.load(Ordering::SeqCst) < 100);
        let last = agent.context().messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.text().starts_with("word "));
        assert!(last.tool_calls.is_none());
    }

    #[tokio::test]
    async fn test_autoplan_runs_once_before_loop() {
        let client = MockClient::new(vec![Reply::Text("- read\n- fix"), Reply::Text("fixed")]);
        let mut agent = agent_with(client.clone(), EchoTool::new());
        agent.config.autoplan = true;

        let (outcome, events) = run(&mut agent, "fix it").await;
        assert!(outcome.is_success());
        assert!(events.contains(&AgentEvent::PlanReady { text: "- read\n- fix".into() }));
        assert!(!events.contains(&AgentEvent::TurnStart { turn: 2 }));
        assert_eq!(client.requests(), 2);

        let messages = agent.context().messages();
        assert_eq!(messages[1].text(), "- read\n- fix");
        assert_eq!(messages[2].text(), "fixed");
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_turns() {
        let client = MockClient::new(vec![
            Reply::Calls(vec![("c1", "echo", json!({"text": "a"}))]),
            Reply::Text("done"),
        ]);
        let mut agent = agent_with(client, EchoTool::new());

        let (_, events) = run(&mut agent, "go").await;
        match events.last() {
            Some(AgentEvent::AgentEnd { usage, .. }) => {
                assert_eq!(*usage, Usage::new(200, 20));
            }
            other => panic!("unexpected last event: {:?}", other),
        }
        assert_eq!(*agent.context().total_usage(), Usage::new(200, 20));
        assert_eq!(agent.session().turn_count(), 2);
    }

    #[tokio::test]
    async fn test_restore_keeps_history() {
        let client = MockClient::new(vec![Reply::Text("first")]);
        let mut agent = agent_with(client.clone(), EchoTool::new());
        run(&mut agent, "hi").await;
        let snapshot = agent.snapshot();

        let mut fresh = agent_with(client, EchoTool::new());
        fresh.restore(snapshot);
        assert_eq!(fresh.context().messages(), agent.context().messages());
        assert_eq!(fresh.session().id(), agent.session().id());

        fresh.clear();
        assert!(fresh.context().is_empty());
        assert_ne!(fresh.session().id(), agent.session().id());
    }
}
