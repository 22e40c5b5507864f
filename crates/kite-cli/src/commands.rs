//! Slash commands for interactive mode

use kite_agent::Agent;

use crate::session::SessionStore;
use crate::utils::{format_tokens, format_usage};

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Clear,
    Compact,
    Save,
    Sessions,
    Usage,
    Quit,
    Unknown(String),
}

/// Result of executing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the agent)
    Message(String),
    /// Exit the application
    Exit,
}

impl Command {
    /// Parse `input` as a slash command, or `None` if it is a prompt
    pub fn parse(input: &str) -> Option<Self> {
        let name = input.trim().strip_prefix('/')?;
        let name = name.split_whitespace().next().unwrap_or_default().to_lowercase();
        Some(match name.as_str() {
            "help" | "h" | "?" => Command::Help,
            "clear" | "c" => Command::Clear,
            "compact" => Command::Compact,
            "save" => Command::Save,
            "sessions" => Command::Sessions,
            "usage" | "u" => Command::Usage,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Unknown(name),
        })
    }
}

pub fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /clear, /c           Start a new session with empty history
  /compact             Summarize the conversation to free context
  /save                Save the session now
  /sessions            List saved sessions
  /usage, /u           Show token usage for this session
  /quit, /exit, /q     Exit"#
        .to_string()
}

/// Execute a parsed command against the running agent
pub async fn execute(command: Command, agent: &mut Agent, store: &SessionStore) -> CommandResult {
    let message = match command {
        Command::Help => help_message(),
        Command::Quit => return CommandResult::Exit,
        Command::Clear => {
            agent.clear();
            format!("Cleared conversation. New session {}", agent.session().id())
        }
        Command::Compact => match agent.compact().await {
            Ok(summary) => format!(
                "Context compacted: ~{} -> ~{} tokens",
                format_tokens(summary.tokens_before),
                format_tokens(summary.tokens_after)
            ),
            Err(e) => format!("Compaction failed: {}", e),
        },
        Command::Save => match store.save(&agent.snapshot()) {
            Ok(path) => format!("Saved session to {}", path.display()),
            Err(e) => format!("Failed to save session: {:#}", e),
        },
        Command::Sessions => match store.list() {
            Ok(sessions) => format_session_list(&sessions),
            Err(e) => format!("Failed to list sessions: {:#}", e),
        },
        Command::Usage => usage_report(agent),
        Command::Unknown(name) => {
            format!("Unknown command: /{}\nType /help for available commands.", name)
        }
    };
    CommandResult::Message(message)
}

fn usage_report(agent: &Agent) -> String {
    let context = agent.context();
    let window = agent.config().model.context_window;
    let estimated = context.estimated_tokens();
    format!(
        "Session {}\n  turns: {}\n  messages: {}\n  context: ~{} of {} tokens\n  total: {}",
        agent.session().id(),
        agent.session().turn_count(),
        context.len(),
        format_tokens(estimated),
        format_tokens(u64::from(window)),
        format_usage(context.total_usage())
    )
}

pub fn format_session_list(sessions: &[crate::session::SessionInfo]) -> String {
    if sessions.is_empty() {
        return "No saved sessions found.".to_string();
    }
    let mut lines = vec![format!(
        "{:<38} {:<17} {:>5}  {}",
        "ID", "Updated", "Turns", "First message"
    )];
    for s in sessions {
        lines.push(format!(
            "{:<38} {:<17} {:>5}  {}",
            s.id,
            s.updated_at_display(),
            s.turn_count,
            s.preview
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse("  /Q "), Some(Command::Quit));
        assert_eq!(Command::parse("/compact now"), Some(Command::Compact));
        assert_eq!(Command::parse("/nope"), Some(Command::Unknown("nope".into())));
        assert_eq!(Command::parse("fix the bug"), None);
    }

    #[test]
    fn test_empty_session_list() {
        assert_eq!(format_session_list(&[]), "No saved sessions found.");
    }
}
