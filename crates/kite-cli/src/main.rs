//! kite - autonomous coding agent CLI

mod commands;
mod config;
mod confirm;
mod output;
mod session;
mod tools;
mod utils;

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kite_agent::subagent::SUBAGENT_TOOL_NAME;
use kite_agent::{
    Agent, AgentConfig, ApprovalPolicy, Confirmer, EventSink, Hooks, RetryConfig, RetryingClient,
    RunOutcome, SubagentTool, ToolRegistry,
};
use kite_ai::ModelClient;
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, CommandResult};
use crate::config::{Config, Overrides, ResolvedConfig};
use crate::confirm::StdinConfirmer;
use crate::session::SessionStore;

const EVENT_BUFFER: usize = 256;

/// kite - autonomous coding agent
#[derive(Parser, Debug)]
#[command(name = "kite")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default depends on the provider)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (anthropic, openai, groq, xai, openrouter, ollama, custom)
    #[arg(short, long)]
    provider: Option<String>,

    /// Working directory tools run in
    #[arg(short, long)]
    working_dir: Option<PathBuf>,

    /// Approval policy (yolo, never, auto, on-failure, auto-edit, on-request)
    #[arg(long = "approval")]
    approval_policy: Option<ApprovalPolicy>,

    /// Maximum turns per prompt
    #[arg(long)]
    max_turns: Option<u32>,

    /// Ask the model for a plan before acting
    #[arg(long)]
    autoplan: bool,

    /// Run a single prompt non-interactively and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Resume a saved session by ID (or unique ID prefix)
    #[arg(long)]
    resume: Option<String>,

    /// List saved sessions
    #[arg(long)]
    sessions: bool,

    /// Verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("kite=debug,kite_agent=debug,kite_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let store = SessionStore::new(SessionStore::default_dir());

    if args.sessions {
        println!("{}", commands::format_session_list(&store.list()?));
        println!("\nSessions are stored in: {}", store.dir().display());
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = Config::config_path(std::env::var_os("KITE_CONFIG_PATH").map(PathBuf::from));
    let config = Config::load(&config_path)?;
    let overrides = Overrides {
        model: args.model,
        provider: args.provider,
        working_dir: args.working_dir,
        approval_policy: args.approval_policy,
        max_turns: args.max_turns,
        autoplan: args.autoplan,
    };
    let cwd = std::env::current_dir()?;
    let resolved = ResolvedConfig::resolve(&config, overrides, &cwd, |key| std::env::var(key).ok())?;
    tracing::debug!(
        model = %resolved.model.id,
        provider = resolved.model.provider.name(),
        policy = %resolved.approval_policy,
        "Resolved configuration"
    );

    let mut agent = build_agent(&resolved)?;

    if let Some(ref id) = args.resume {
        let snapshot = store.load(id)?;
        eprintln!(
            "Resuming session {} ({} messages)",
            snapshot.session_id,
            snapshot.messages.len()
        );
        agent.restore(snapshot);
    }

    match args.command {
        Some(prompt) => Ok(run_command(&mut agent, &store, &prompt).await),
        None => run_interactive(&mut agent, &store).await,
    }
}

/// Wire the model client, tools, hooks and confirmer into an agent
fn build_agent(resolved: &ResolvedConfig) -> anyhow::Result<Agent> {
    let client = kite_ai::create_client(resolved.model.clone(), resolved.api_key.clone())?;
    let client: Arc<dyn ModelClient> = Arc::new(RetryingClient::new(client, RetryConfig::default()));
    let hooks: Arc<dyn Hooks> = Arc::new(resolved.hooks.build());
    let confirmer: Arc<dyn Confirmer> = Arc::new(StdinConfirmer::new());

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tools::BashTool::new(resolved.shell_timeout)));
    registry.register(Arc::new(tools::ReadTool::new()));
    registry.register(Arc::new(tools::WriteTool::new()));
    registry.register(Arc::new(tools::EditTool::new()));
    registry.register(Arc::new(tools::GlobTool::new()));
    registry.register(Arc::new(tools::WebFetchTool::new()));
    registry.register(Arc::new(tools::MemoryTool::new()));

    let system_prompt = match resolved.system_prompt {
        Some(ref prompt) => prompt.clone(),
        None => {
            let mut names = registry.names();
            names.push(SUBAGENT_TOOL_NAME);
            build_system_prompt(&names, &resolved.working_dir)
        }
    };

    let config = AgentConfig::new(resolved.model.clone(), resolved.working_dir.clone())
        .with_system_prompt(system_prompt)
        .with_max_turns(resolved.max_turns)
        .with_approval_policy(resolved.approval_policy)
        .with_autoplan(resolved.autoplan);

    let subagent = SubagentTool::new(client.clone(), &registry, config.clone())
        .with_timeout(resolved.subagent_timeout)
        .with_hooks(hooks.clone())
        .with_confirmer(confirmer.clone());
    registry.register(Arc::new(subagent));

    Ok(Agent::new(config, client, Arc::new(registry))
        .with_hooks(hooks)
        .with_confirmer(confirmer))
}

/// Run one prompt with a renderer draining the event channel. Ctrl-C drops
/// the receiver, which cancels the run at its next checkpoint.
async fn run_prompt(agent: &mut Agent, input: &str) -> RunOutcome {
    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let renderer = output::spawn_renderer(rx, io::stdout().is_terminal());

    let outcome = {
        let run = agent.prompt(input, &sink);
        tokio::pin!(run);
        tokio::select! {
            outcome = &mut run => outcome,
            _ = tokio::signal::ctrl_c() => {
                renderer.abort();
                eprintln!("\nInterrupted");
                run.await
            }
        }
    };

    drop(sink);
    let _ = renderer.await;
    outcome
}

async fn run_command(agent: &mut Agent, store: &SessionStore, prompt: &str) -> ExitCode {
    let outcome = run_prompt(agent, prompt).await;
    println!();
    if let Err(e) = store.save(&agent.snapshot()) {
        tracing::warn!("Failed to save session: {:#}", e);
    }

    match outcome {
        RunOutcome::Completed { .. } => ExitCode::SUCCESS,
        other => {
            tracing::debug!(?other, "Run did not complete");
            ExitCode::FAILURE
        }
    }
}

async fn run_interactive(agent: &mut Agent, store: &SessionStore) -> anyhow::Result<ExitCode> {
    if io::stderr().is_terminal() {
        let session_id = agent.session().id();
        eprintln!(
            "kite ({}) session: {}",
            agent.config().model.id,
            session_id.get(..8).unwrap_or(session_id)
        );
        eprintln!("Type /help for commands.\n");
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = Command::parse(input) {
            match commands::execute(command, agent, store).await {
                CommandResult::Exit => break,
                CommandResult::Message(message) => println!("{}\n", message),
            }
            continue;
        }

        println!();
        let outcome = run_prompt(agent, input).await;
        tracing::debug!(success = outcome.is_success(), "Prompt finished");

        if let Err(e) = store.save(&agent.snapshot()) {
            tracing::warn!("Autosave failed: {:#}", e);
        }
        println!();
    }

    Ok(ExitCode::SUCCESS)
}

/// Build the default system prompt for the registered tools
fn build_system_prompt(tool_names: &[&str], working_dir: &Path) -> String {
    let has = |name: &str| tool_names.contains(&name);
    let can_modify = has("write") || has("edit") || has("bash");

    let mut prompt = String::from(
        "You are kite, an autonomous coding agent. Work through the task step by step using \
         the available tools, and stop once it is complete.\n\n",
    );

    if !can_modify {
        prompt.push_str("NOTE: You are in READ-ONLY mode. You can explore and analyze code but cannot make changes.\n\n");
    }

    let descriptions = [
        ("bash", "Execute shell commands"),
        ("read", "Read file contents"),
        ("write", "Write content to a file"),
        ("edit", "Make exact text replacements in files"),
        ("glob", "Find files by pattern"),
        ("web_fetch", "Fetch a web page"),
        ("memory", "Store and recall notes about this project"),
        (SUBAGENT_TOOL_NAME, "Delegate a self-contained subtask to a nested agent"),
    ];
    prompt.push_str("Tools:\n");
    for (name, description) in descriptions.iter().filter(|(name, _)| has(name)) {
        prompt.push_str(&format!("- {}: {}\n", name, description));
    }

    prompt.push_str("\nGuidelines:\n- Be concise\n");
    if has("read") && (has("edit") || has("write")) {
        prompt.push_str("- Always read files before making edits\n");
    }
    if has("edit") && has("write") {
        prompt.push_str("- Use edit for small changes, write for new files\n");
    }
    if has("bash") {
        prompt.push_str("- Prefer read-only commands when exploring; destructive commands may be refused\n");
    }
    if has("memory") {
        prompt.push_str("- Check memory at the start of a task for project conventions\n");
    }
    prompt.push_str("- When the task is done, reply with a short summary and no tool calls\n");

    prompt.push_str(&format!("\nWorking directory: {}", working_dir.display()));
    prompt
}
