//! Lifecycle hooks: external commands run at fixed points of a run
//!
//! Hook failures are logged and swallowed. They never affect the run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::tool::ToolResult;

/// Per-command limit for hook execution
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// The points in a run where hooks fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTrigger {
    BeforeAgent,
    AfterAgent,
    BeforeTool,
    AfterTool,
    OnError,
}

impl HookTrigger {
    pub const ALL: [HookTrigger; 5] = [
        HookTrigger::BeforeAgent,
        HookTrigger::AfterAgent,
        HookTrigger::BeforeTool,
        HookTrigger::AfterTool,
        HookTrigger::OnError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookTrigger::BeforeAgent => "before_agent",
            HookTrigger::AfterAgent => "after_agent",
            HookTrigger::BeforeTool => "before_tool",
            HookTrigger::AfterTool => "after_tool",
            HookTrigger::OnError => "on_error",
        }
    }
}

/// What a hook gets to see
#[derive(Debug, Clone)]
pub struct HookContext {
    pub trigger: HookTrigger,
    pub cwd: PathBuf,
    pub tool_name: Option<String>,
    pub tool_params: Option<serde_json::Value>,
    pub tool_result: Option<ToolResult>,
    pub error: Option<String>,
    pub user_message: Option<String>,
    pub response: Option<String>,
}

impl HookContext {
    pub fn new(trigger: HookTrigger, cwd: impl Into<PathBuf>) -> Self {
        Self {
            trigger,
            cwd: cwd.into(),
            tool_name: None,
            tool_params: None,
            tool_result: None,
            error: None,
            user_message: None,
            response: None,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, params: serde_json::Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_params = Some(params);
        self
    }

    pub fn with_result(mut self, result: ToolResult) -> Self {
        self.tool_result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Environment variables passed to hook commands
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("KITE_HOOK_TRIGGER", self.trigger.as_str().to_string()),
            ("KITE_CWD", self.cwd.display().to_string()),
        ];
        if let Some(ref name) = self.tool_name {
            vars.push(("KITE_TOOL_NAME", name.clone()));
        }
        if let Some(ref params) = self.tool_params {
            vars.push(("KITE_TOOL_PARAMS", params.to_string()));
        }
        if let Some(ref result) = self.tool_result {
            vars.push((
                "KITE_TOOL_RESULT",
                serde_json::to_string(result).unwrap_or_default(),
            ));
        }
        if let Some(ref error) = self.error {
            vars.push(("KITE_ERROR", error.clone()));
        }
        if let Some(ref message) = self.user_message {
            vars.push(("KITE_USER_MESSAGE", message.clone()));
        }
        if let Some(ref response) = self.response {
            vars.push(("KITE_RESPONSE", response.clone()));
        }
        vars
    }
}

/// Receives lifecycle notifications. Implementations must not fail.
#[async_trait]
pub trait Hooks: Send + Sync {
    async fn fire(&self, context: &HookContext);
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

#[async_trait]
impl Hooks for NoHooks {
    async fn fire(&self, _context: &HookContext) {}
}

/// Runs configured shell commands per trigger
#[derive(Debug, Default, Clone)]
pub struct CommandHooks {
    commands: HashMap<HookTrigger, Vec<String>>,
    timeout: Option<Duration>,
}

impl CommandHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, trigger: HookTrigger, command: impl Into<String>) {
        self.commands
            .entry(trigger)
            .or_default()
            .push(command.into());
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.values().all(Vec::is_empty)
    }

    async fn run_command(&self, command: &str, context: &HookContext) {
        let timeout = self.timeout.unwrap_or(HOOK_TIMEOUT);
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&context.cwd)
            .envs(context.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(trigger = context.trigger.as_str(), "Failed to spawn hook '{}': {}", command, e);
                return;
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!(trigger = context.trigger.as_str(), "Hook '{}' succeeded", command);
            }
            Ok(Ok(output)) => {
                tracing::warn!(
                    trigger = context.trigger.as_str(),
                    "Hook '{}' exited with {}: {}",
                    command,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(trigger = context.trigger.as_str(), "Hook '{}' failed: {}", command, e);
            }
            Err(_) => {
                tracing::warn!(
                    trigger = context.trigger.as_str(),
                    "Hook '{}' timed out after {}s",
                    command,
                    timeout.as_secs()
                );
            }
        }
    }
}

#[async_trait]
impl Hooks for CommandHooks {
    async fn fire(&self, context: &HookContext) {
        let Some(commands) = self.commands.get(&context.trigger) else {
            return;
        };
        for command in commands {
            self.run_command(command, context).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_env_contract() {
        let ctx = HookContext::new(HookTrigger::AfterTool, "/work")
            .with_tool("bash", json!({"command": "ls"}))
            .with_result(ToolResult::success("a\nb"));
        let vars: HashMap<_, _> = ctx.env_vars().into_iter().collect();
        assert_eq!(vars["KITE_HOOK_TRIGGER"], "after_tool");
        assert_eq!(vars["KITE_CWD"], "/work");
        assert_eq!(vars["KITE_TOOL_NAME"], "bash");
        assert_eq!(vars["KITE_TOOL_PARAMS"], r#"{"command":"ls"}"#);
        assert!(vars["KITE_TOOL_RESULT"].contains("\"success\":true"));
        assert!(!vars.contains_key("KITE_ERROR"));
    }

    #[tokio::test]
    async fn test_command_hook_receives_env() {
        let dir = TempDir::new().unwrap();
        let mut hooks = CommandHooks::new();
        hooks.add(
            HookTrigger::BeforeAgent,
            "printf '%s|%s' \"$KITE_HOOK_TRIGGER\" \"$KITE_USER_MESSAGE\" > hook.out",
        );

        let ctx = HookContext::new(HookTrigger::BeforeAgent, dir.path()).with_user_message("hi");
        hooks.fire(&ctx).await;

        let written = std::fs::read_to_string(dir.path().join("hook.out")).unwrap();
        assert_eq!(written, "before_agent|hi");
    }

    #[tokio::test]
    async fn test_failing_hooks_are_swallowed() {
        let dir = TempDir::new().unwrap();
        let mut hooks = CommandHooks::new().with_timeout(Duration::from_millis(200));
        hooks.add(HookTrigger::OnError, "exit 3");
        hooks.add(HookTrigger::OnError, "sleep 5");
        hooks.add(HookTrigger::OnError, "touch ran-after-failures");

        hooks
            .fire(&HookContext::new(HookTrigger::OnError, dir.path()).with_error("boom"))
            .await;
        assert!(dir.path().join("ran-after-failures").exists());
    }

    #[tokio::test]
    async fn test_other_triggers_not_run() {
        let dir = TempDir::new().unwrap();
        let mut hooks = CommandHooks::new();
        hooks.add(HookTrigger::AfterAgent, "touch after");
        hooks
            .fire(&HookContext::new(HookTrigger::BeforeAgent, dir.path()))
            .await;
        assert!(!dir.path().join("after").exists());
    }
}
