//! Interactive confirmation of gated actions

use std::collections::HashSet;
use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use kite_agent::{ConfirmationRequest, Confirmer};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Yes,
    No,
    Always,
}

impl Answer {
    fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => Answer::Yes,
            "a" | "always" => Answer::Always,
            _ => Answer::No,
        }
    }
}

/// Asks on the terminal before running a gated action. Answering `a` allows
/// the tool for the rest of the process.
#[derive(Default)]
pub struct StdinConfirmer {
    always_allow: Mutex<HashSet<String>>,
}

impl StdinConfirmer {
    pub fn new() -> Self {
        Self::default()
    }

    fn prompt(request: &ConfirmationRequest) -> io::Result<String> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr)?;
        writeln!(stderr, "[{}] {}", request.tool_name, request.title)?;
        if let Some(command) = &request.command {
            writeln!(stderr, "  command: {}", command)?;
        }
        for path in &request.paths {
            writeln!(stderr, "  path: {}", path.display())?;
        }
        writeln!(stderr, "  needs confirmation: {}", request.reason)?;
        write!(stderr, "Allow? [y]es / [n]o / [a]lways for {}: ", request.tool_name)?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }

    fn record(&self, tool_name: &str, answer: Answer) -> bool {
        match answer {
            Answer::Yes => true,
            Answer::No => false,
            Answer::Always => {
                self.always_allow.lock().insert(tool_name.to_string());
                true
            }
        }
    }
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        if self.always_allow.lock().contains(&request.tool_name) {
            tracing::debug!(tool = %request.tool_name, "Allowed for this process");
            return true;
        }

        let owned = request.clone();
        let line = match tokio::task::spawn_blocking(move || Self::prompt(&owned)).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                tracing::warn!("Failed to read confirmation: {}", e);
                return false;
            }
            Err(e) => {
                tracing::warn!("Confirmation prompt panicked: {}", e);
                return false;
            }
        };
        self.record(&request.tool_name, Answer::parse(&line))
    }
}
