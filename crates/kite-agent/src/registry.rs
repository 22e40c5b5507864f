//! Tool registry and the dispatch pipeline every tool call goes through

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use kite_ai::{ToolCall, ToolSchema};

use crate::approval::{ApprovalDecision, ApprovalManager, ApprovalRequest};
use crate::hooks::{HookContext, HookTrigger, Hooks};
use crate::tool::{BoxedTool, ToolInvocation, ToolResult};

/// A pending action shown to the human operator
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub title: String,
    pub command: Option<String>,
    pub paths: Vec<PathBuf>,
    /// Why confirmation is required
    pub reason: String,
}

/// Asks a human whether a pending action may proceed
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Everything a dispatch needs besides the call itself
#[derive(Clone, Copy)]
pub struct DispatchContext<'a> {
    pub cwd: &'a Path,
    pub hooks: &'a Arc<dyn Hooks>,
    pub approval: Option<&'a ApprovalManager>,
    pub confirmer: Option<&'a Arc<dyn Confirmer>>,
}

/// Tools keyed by name, in registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
    order: Vec<String>,
    /// Compiled parameter validators keyed by tool name
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: BoxedTool) {
        let name = tool.name().to_string();
        match jsonschema::validator_for(&tool.parameters_schema()) {
            Ok(validator) => {
                self.validators.insert(name.clone(), Arc::new(validator));
            }
            Err(e) => {
                self.validators.remove(&name);
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    name,
                    e
                );
            }
        }
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Schemas sent to the model, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    /// A copy of this registry without the named tool
    pub fn without(&self, name: &str) -> Self {
        let mut copy = self.clone();
        copy.tools.remove(name);
        copy.validators.remove(name);
        copy.order.retain(|n| n != name);
        copy
    }

    /// Run one tool call through lookup, validation, hooks, approval and
    /// execution. Every path returns exactly one result and fires the
    /// after-tool hook exactly once.
    pub async fn invoke(&self, call: &ToolCall, ctx: &DispatchContext<'_>) -> ToolResult {
        let result = self.run_pipeline(call, ctx).await;

        let hook = HookContext::new(HookTrigger::AfterTool, ctx.cwd)
            .with_tool(&call.name, call.arguments.clone())
            .with_result(result.clone());
        ctx.hooks.fire(&hook).await;

        result
    }

    async fn run_pipeline(&self, call: &ToolCall, ctx: &DispatchContext<'_>) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::debug!(tool = %call.name, "Unknown tool requested");
            return ToolResult::failure(format!("Tool not found: {}", call.name));
        };

        if let Some(message) = self.validate(tool, &call.arguments) {
            return ToolResult::failure(message);
        }

        // Observers only; the tool does not wait for it
        let hooks = Arc::clone(ctx.hooks);
        let before = HookContext::new(HookTrigger::BeforeTool, ctx.cwd)
            .with_tool(&call.name, call.arguments.clone());
        tokio::spawn(async move { hooks.fire(&before).await });

        let invocation = ToolInvocation {
            name: &call.name,
            params: &call.arguments,
            cwd: ctx.cwd,
        };
        if let Some(approval) = ctx.approval.filter(|_| tool.mutates(&invocation)) {
            if let Err(denied) = self.check_approval(tool, &invocation, approval, ctx).await {
                return denied;
            }
        }

        tracing::debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        let execution = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx.cwd));
        match execution.catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::failure(e.to_string()),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(tool = %call.name, "Tool panicked: {}", message);
                ToolResult::failure(format!("Tool '{}' crashed: {}", call.name, message))
            }
        }
    }

    /// Required fields first for a clear message, then the full schema
    fn validate(&self, tool: &BoxedTool, args: &serde_json::Value) -> Option<String> {
        let schema = tool.schema();
        let missing: Vec<&str> = schema
            .required_fields()
            .into_iter()
            .filter(|field| args.get(field).is_none_or(|v| v.is_null()))
            .collect();
        if !missing.is_empty() {
            return Some(format!(
                "Missing required parameter(s): {}",
                missing.join(", ")
            ));
        }

        let validator = self.validators.get(tool.name())?;
        let errors: Vec<String> = validator
            .iter_errors(args)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if errors.is_empty() {
            None
        } else {
            Some(format!(
                "Tool argument validation failed:\n{}",
                errors.join("\n")
            ))
        }
    }

    async fn check_approval(
        &self,
        tool: &BoxedTool,
        invocation: &ToolInvocation<'_>,
        approval: &ApprovalManager,
        ctx: &DispatchContext<'_>,
    ) -> Result<(), ToolResult> {
        let confirmation = tool.confirmation(invocation).unwrap_or_default();
        let request = ApprovalRequest {
            is_mutating: true,
            command: confirmation.command.as_deref(),
            paths: &confirmation.paths,
            dangerous: confirmation.dangerous,
        };

        match approval.evaluate(&request) {
            ApprovalDecision::Approved => Ok(()),
            ApprovalDecision::Rejected => {
                tracing::info!(tool = %invocation.name, policy = %approval.policy(), "Action rejected");
                Err(ToolResult::failure(format!(
                    "Action rejected by approval policy '{}'",
                    approval.policy()
                )))
            }
            ApprovalDecision::NeedsConfirmation => {
                let Some(confirmer) = ctx.confirmer else {
                    return Err(ToolResult::failure(
                        "Action requires confirmation but no one is available to confirm it",
                    ));
                };
                let title = if confirmation.title.is_empty() {
                    format!("Run {}", invocation.name)
                } else {
                    confirmation.title.clone()
                };
                let request = ConfirmationRequest {
                    tool_name: invocation.name.to_string(),
                    title,
                    command: confirmation.command.clone(),
                    reason: confirmation_reason(approval, &confirmation.paths, confirmation.dangerous),
                    paths: confirmation.paths,
                };
                if confirmer.confirm(&request).await {
                    Ok(())
                } else {
                    Err(ToolResult::failure("Action denied by user"))
                }
            }
        }
    }
}

fn confirmation_reason(approval: &ApprovalManager, paths: &[PathBuf], dangerous: bool) -> String {
    if paths.iter().any(|p| !approval.is_within_working_dir(p)) {
        "touches paths outside the working directory".to_string()
    } else if dangerous {
        "flagged as dangerous".to_string()
    } else {
        format!("approval policy '{}'", approval.policy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalPolicy;
    use crate::tool::{Confirmation, Tool, ToolError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHooks {
        after: AtomicUsize,
        results: Mutex<Vec<ToolResult>>,
    }

    #[async_trait]
    impl Hooks for RecordingHooks {
        async fn fire(&self, context: &HookContext) {
            if context.trigger == HookTrigger::AfterTool {
                self.after.fetch_add(1, Ordering::SeqCst);
                if let Some(ref result) = context.tool_result {
                    self.results.lock().push(result.clone());
                }
            }
        }
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct TestTool {
        name: &'static str,
        mutating: bool,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl TestTool {
        fn new(name: &'static str, mutating: bool, behavior: Behavior) -> Self {
            Self {
                name,
                mutating,
                behavior,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Tool for TestTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "count": {"type": "integer"}
                },
                "required": ["command"]
            })
        }

        fn is_mutating(&self) -> bool {
            self.mutating
        }

        fn confirmation(&self, invocation: &ToolInvocation<'_>) -> Option<Confirmation> {
            let command = invocation.params["command"].as_str()?;
            Some(Confirmation::new(format!("Run {}", command)).with_command(command))
        }

        async fn execute(
            &self,
            params: serde_json::Value,
            _cwd: &Path,
        ) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(ToolResult::success(format!("ran {}", params["command"]))),
                Behavior::Fail => Err(ToolError::failed("exploded")),
                Behavior::Panic => panic!("tool bug"),
            }
        }
    }

    struct FixedConfirmer(bool);

    #[async_trait]
    impl Confirmer for FixedConfirmer {
        async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
            self.0
        }
    }

    fn registry_with(tool: TestTool) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool));
        registry
    }

    async fn invoke_counted(
        registry: &ToolRegistry,
        call: ToolCall,
        approval: Option<&ApprovalManager>,
        confirmer: Option<Arc<dyn Confirmer>>,
    ) -> (ToolResult, usize) {
        let recording = Arc::new(RecordingHooks::default());
        let hooks: Arc<dyn Hooks> = recording.clone();
        let cwd = std::env::temp_dir();
        let ctx = DispatchContext {
            cwd: &cwd,
            hooks: &hooks,
            approval,
            confirmer: confirmer.as_ref(),
        };
        let result = registry.invoke(&call, &ctx).await;
        assert_eq!(recording.results.lock().as_slice(), &[result.clone()]);
        (result, recording.after.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("c1", "nope", json!({}));
        let (result, after) = invoke_counted(&registry, call, None, None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Tool not found"));
        assert_eq!(after, 1);
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let tool = TestTool::new("t", false, Behavior::Succeed);
        let calls = tool.calls.clone();
        let registry = registry_with(tool);
        let (result, after) =
            invoke_counted(&registry, ToolCall::new("c1", "t", json!({})), None, None).await;
        assert!(result.error.unwrap().contains("Missing required parameter(s): command"));
        assert_eq!(after, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schema_type_mismatch() {
        let registry = registry_with(TestTool::new("t", false, Behavior::Succeed));
        let call = ToolCall::new("c1", "t", json!({"command": "ls", "count": "three"}));
        let (result, after) = invoke_counted(&registry, call, None, None).await;
        assert!(result.error.unwrap().contains("validation failed"));
        assert_eq!(after, 1);
    }

    #[tokio::test]
    async fn test_approval_rejection() {
        let tool = TestTool::new("bash", true, Behavior::Succeed);
        let calls = tool.calls.clone();
        let registry = registry_with(tool);
        let approval = ApprovalManager::new(ApprovalPolicy::Never, std::env::temp_dir());
        let call = ToolCall::new("c1", "bash", json!({"command": "make install"}));
        let (result, after) = invoke_counted(&registry, call, Some(&approval), None).await;
        assert!(result.error.unwrap().contains("rejected"));
        assert_eq!(after, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confirmation_denied_and_granted() {
        let approval = ApprovalManager::new(ApprovalPolicy::OnRequest, std::env::temp_dir());
        let call = ToolCall::new("c1", "bash", json!({"command": "./deploy.sh"}));

        let registry = registry_with(TestTool::new("bash", true, Behavior::Succeed));
        let (result, after) = invoke_counted(
            &registry,
            call.clone(),
            Some(&approval),
            Some(Arc::new(FixedConfirmer(false))),
        )
        .await;
        assert_eq!(result.error.as_deref(), Some("Action denied by user"));
        assert_eq!(after, 1);

        let (result, _) =
            invoke_counted(&registry, call.clone(), Some(&approval), Some(Arc::new(FixedConfirmer(true))))
                .await;
        assert!(result.success);

        // No confirmer counts as a denial
        let (result, _) = invoke_counted(&registry, call, Some(&approval), None).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_execution_error_and_panic() {
        let registry = registry_with(TestTool::new("t", false, Behavior::Fail));
        let call = ToolCall::new("c1", "t", json!({"command": "x"}));
        let (result, after) = invoke_counted(&registry, call.clone(), None, None).await;
        assert_eq!(result.error.as_deref(), Some("exploded"));
        assert_eq!(after, 1);

        let registry = registry_with(TestTool::new("t", false, Behavior::Panic));
        let (result, after) = invoke_counted(&registry, call, None, None).await;
        assert!(result.error.unwrap().contains("tool bug"));
        assert_eq!(after, 1);
    }

    #[tokio::test]
    async fn test_success() {
        let registry = registry_with(TestTool::new("t", false, Behavior::Succeed));
        let call = ToolCall::new("c1", "t", json!({"command": "x"}));
        let (result, after) = invoke_counted(&registry, call, None, None).await;
        assert!(result.success);
        assert_eq!(after, 1);
    }

    /// Mutates only when asked to write
    struct NotesTool;

    #[async_trait]
    impl Tool for NotesTool {
        fn name(&self) -> &str {
            "notes"
        }

        fn description(&self) -> &str {
            "notes"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"action": {"type": "string"}}, "required": ["action"]})
        }

        fn is_mutating(&self) -> bool {
            true
        }

        fn mutates(&self, invocation: &ToolInvocation<'_>) -> bool {
            invocation.params["action"] != "list"
        }

        async fn execute(&self, params: serde_json::Value, _cwd: &Path) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(format!("{}", params["action"])))
        }
    }

    #[tokio::test]
    async fn test_read_only_call_of_mutating_tool_skips_approval() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NotesTool));
        let approval = ApprovalManager::new(ApprovalPolicy::OnRequest, std::env::temp_dir());

        let list = ToolCall::new("c1", "notes", json!({"action": "list"}));
        let (result, _) = invoke_counted(&registry, list, Some(&approval), None).await;
        assert!(result.success);

        let add = ToolCall::new("c2", "notes", json!({"action": "add"}));
        let (result, _) = invoke_counted(&registry, add, Some(&approval), None).await;
        assert!(result.error.unwrap().contains("requires confirmation"));
    }

    #[test]
    fn test_registration_order_and_without() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(TestTool::new("b", false, Behavior::Succeed)));
        registry.register(Arc::new(TestTool::new("a", false, Behavior::Succeed)));
        registry.register(Arc::new(TestTool::new("b", true, Behavior::Succeed)));
        assert_eq!(registry.names(), vec!["b", "a"]);
        assert!(registry.get("b").unwrap().is_mutating());

        let trimmed = registry.without("b");
        assert_eq!(trimmed.names(), vec!["a"]);
        assert_eq!(trimmed.schemas().len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
