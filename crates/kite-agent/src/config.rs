//! Run parameters for an agent

use std::path::PathBuf;

use kite_ai::Model;

use crate::approval::ApprovalPolicy;

/// Default turn cap per user message
pub const DEFAULT_MAX_TURNS: u32 = 50;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: Model,
    /// System prompt, regenerated on every request and never persisted
    pub system_prompt: Option<String>,
    /// Hard cap on turns per user message
    pub max_turns: u32,
    pub approval_policy: ApprovalPolicy,
    /// Ask the model for a short plan before the first turn
    pub autoplan: bool,
    /// Directory tools run in
    pub working_dir: PathBuf,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
}

impl AgentConfig {
    pub fn new(model: Model, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            system_prompt: None,
            max_turns: DEFAULT_MAX_TURNS,
            approval_policy: ApprovalPolicy::default(),
            autoplan: false,
            working_dir: working_dir.into(),
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_approval_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.approval_policy = policy;
        self
    }

    pub fn with_autoplan(mut self, autoplan: bool) -> Self {
        self.autoplan = autoplan;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}
