//! A tool that delegates a task to a nested agent run

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kite_ai::ModelClient;
use serde_json::json;
use tokio::time::Instant;

use crate::{
    agent::Agent,
    config::AgentConfig,
    events::{AgentEvent, EventSink, RunOutcome},
    hooks::{Hooks, NoHooks},
    registry::{Confirmer, ToolRegistry},
    tool::{Tool, ToolError, ToolResult, required_str},
};

pub const SUBAGENT_TOOL_NAME: &str = "subagent";

/// Default wall-clock limit for a nested run
pub const DEFAULT_SUBAGENT_TIMEOUT: Duration = Duration::from_secs(300);

const SUBAGENT_PROMPT_SUFFIX: &str = "You are running as a subagent on a single delegated task. \
Work autonomously, then reply with a concise report of what you found or changed.";

/// Runs a task in a nested agent with the parent's tools, minus itself
pub struct SubagentTool {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
    hooks: Arc<dyn Hooks>,
    confirmer: Option<Arc<dyn Confirmer>>,
    timeout: Duration,
}

impl SubagentTool {
    pub fn new(client: Arc<dyn ModelClient>, tools: &ToolRegistry, config: AgentConfig) -> Self {
        let system_prompt = match config.system_prompt {
            Some(ref prompt) => format!("{}\n\n{}", prompt, SUBAGENT_PROMPT_SUFFIX),
            None => SUBAGENT_PROMPT_SUFFIX.to_string(),
        };
        Self {
            client,
            registry: Arc::new(tools.without(SUBAGENT_TOOL_NAME)),
            config: AgentConfig {
                system_prompt: Some(system_prompt),
                autoplan: false,
                ..config
            },
            hooks: Arc::new(NoHooks),
            confirmer: None,
            timeout: DEFAULT_SUBAGENT_TIMEOUT,
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What the consumer saw of a nested run
#[derive(Default)]
struct Observed {
    turns: u32,
    text: String,
    timed_out: bool,
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        SUBAGENT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a subagent that has the same tools. \
Returns the subagent's final report."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete description of the task to perform"
                },
                "max_turns": {
                    "type": "integer",
                    "description": "Turn limit for the subagent (optional)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: serde_json::Value, cwd: &Path) -> Result<ToolResult, ToolError> {
        let task = required_str(&params, "task")?;

        let mut config = self.config.clone();
        config.working_dir = cwd.to_path_buf();
        if let Some(max_turns) = params.get("max_turns").and_then(|v| v.as_u64()) {
            config.max_turns = max_turns.clamp(1, u64::from(u32::MAX)) as u32;
        }

        let mut agent = Agent::new(config, Arc::clone(&self.client), Arc::clone(&self.registry))
            .with_hooks(Arc::clone(&self.hooks));
        if let Some(ref confirmer) = self.confirmer {
            agent = agent.with_confirmer(Arc::clone(confirmer));
        }

        let deadline = Instant::now() + self.timeout;
        let (sink, mut rx) = EventSink::channel(64);

        let drive = async move {
            let outcome = agent.prompt(task, &sink).await;
            drop(sink);
            outcome
        };
        // The deadline is checked per event; in-flight work is not interrupted
        let consume = async move {
            let mut observed = Observed::default();
            while let Some(event) = rx.recv().await {
                if Instant::now() >= deadline {
                    observed.timed_out = true;
                    break;
                }
                match event {
                    AgentEvent::TurnStart { .. } => observed.turns += 1,
                    AgentEvent::TextDelta { content } => observed.text.push_str(&content),
                    _ => {}
                }
            }
            observed
        };

        let (outcome, observed) = tokio::join!(drive, consume);
        let metadata = json!({
            "timed_out": observed.timed_out,
            "turns": observed.turns,
        });

        let result = match outcome {
            RunOutcome::Completed { text } => ToolResult::success(text),
            _ if observed.timed_out => {
                tracing::warn!(timeout = ?self.timeout, "Subagent timed out");
                ToolResult::failure(format!(
                    "Subagent timed out after {}s",
                    self.timeout.as_secs()
                ))
                .with_output(observed.text)
            }
            RunOutcome::LimitReached { max_turns } => ToolResult::failure(format!(
                "Subagent stopped after reaching its limit of {} turns",
                max_turns
            ))
            .with_output(observed.text),
            RunOutcome::Failed { error } => {
                ToolResult::failure(format!("Subagent failed: {}", error)).with_output(observed.text)
            }
            RunOutcome::Cancelled => ToolResult::failure("Subagent was cancelled"),
        };

        Ok(result.with_metadata(metadata))
    }
}
