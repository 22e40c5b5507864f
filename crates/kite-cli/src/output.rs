//! Terminal rendering of agent events

use std::io::{self, Write};

use kite_agent::AgentEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::utils::{first_line, format_tokens, format_usage, truncate_chars};

/// Writes events as they arrive: text inline, tool calls as one-line
/// summaries, errors to the error stream
pub struct Renderer<O: Write, E: Write> {
    out: O,
    err: E,
    /// Whether the cursor sits at the start of a line on `out`
    line_start: bool,
    show_usage: bool,
}

impl Renderer<io::Stdout, io::Stderr> {
    pub fn terminal(show_usage: bool) -> Self {
        Self::new(io::stdout(), io::stderr(), show_usage)
    }
}

impl<O: Write, E: Write> Renderer<O, E> {
    pub fn new(out: O, err: E, show_usage: bool) -> Self {
        Self {
            out,
            err,
            line_start: true,
            show_usage,
        }
    }

    fn end_line(&mut self) -> io::Result<()> {
        if !self.line_start {
            writeln!(self.out)?;
            self.line_start = true;
        }
        Ok(())
    }

    fn status(&mut self, text: &str) -> io::Result<()> {
        self.end_line()?;
        writeln!(self.out, "[{}]", text)
    }

    pub fn render(&mut self, event: &AgentEvent) -> io::Result<()> {
        match event {
            AgentEvent::TextDelta { content } => {
                write!(self.out, "{}", content)?;
                self.out.flush()?;
                if !content.is_empty() {
                    self.line_start = content.ends_with('\n');
                }
            }
            AgentEvent::PlanReady { text } => {
                self.end_line()?;
                writeln!(self.out, "Plan:\n{}\n", text.trim_end())?;
            }
            AgentEvent::ToolCallStarted { name, arguments, .. } => {
                self.end_line()?;
                write!(self.out, "[{} {}", name, summarize_arguments(arguments))?;
                self.out.flush()?;
                self.line_start = false;
            }
            AgentEvent::ToolCallCompleted { result, .. } => {
                if result.success {
                    let summary = first_line(&result.output, 60);
                    if summary.is_empty() {
                        writeln!(self.out, " ok]")?;
                    } else {
                        writeln!(self.out, " -> {}]", summary)?;
                    }
                } else {
                    writeln!(self.out, " failed]")?;
                    let error = result.error.as_deref().unwrap_or("tool failed");
                    writeln!(self.out, "  {}", truncate_chars(&error.replace('\n', " "), 120))?;
                }
                self.line_start = true;
            }
            AgentEvent::LoopDetected { description } => {
                self.status(&format!("Loop detected: {}", description))?;
            }
            AgentEvent::Compacted {
                tokens_before,
                tokens_after,
            } => {
                self.status(&format!(
                    "Compacted: ~{} -> ~{} tokens",
                    format_tokens(*tokens_before),
                    format_tokens(*tokens_after)
                ))?;
            }
            AgentEvent::Error { message } => {
                self.end_line()?;
                writeln!(self.err, "Error: {}", message)?;
            }
            AgentEvent::LimitReached { max_turns } => {
                self.end_line()?;
                writeln!(self.err, "Stopped after reaching the limit of {} turns", max_turns)?;
            }
            AgentEvent::AgentEnd { usage, .. } => {
                self.end_line()?;
                if self.show_usage {
                    writeln!(self.out, "[{}]", format_usage(usage))?;
                }
            }
            AgentEvent::AgentStart
            | AgentEvent::TurnStart { .. }
            | AgentEvent::ToolCallPending { .. }
            | AgentEvent::ToolCallArguments { .. }
            | AgentEvent::TurnEnd { .. } => {}
        }
        Ok(())
    }
}

/// Short description of a tool call's arguments
fn summarize_arguments(arguments: &serde_json::Value) -> String {
    for key in ["command", "path", "pattern", "url", "task", "action"] {
        if let Some(value) = arguments.get(key).and_then(|v| v.as_str()) {
            return first_line(value, 60);
        }
    }
    truncate_chars(&arguments.to_string(), 60)
}

/// Drain the channel on a separate task until the agent drops its sink
pub fn spawn_renderer(mut rx: mpsc::Receiver<AgentEvent>, show_usage: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = Renderer::terminal(show_usage);
        while let Some(event) = rx.recv().await {
            if let Err(e) = renderer.render(&event) {
                tracing::debug!("Failed to render event: {}", e);
            }
        }
    })
}
