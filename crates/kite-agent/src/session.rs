//! Conversation state and its persisted snapshot

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use kite_ai::{Message, Role, Usage};
use serde::{Deserialize, Serialize};

use crate::context::ContextManager;
use crate::error::{Error, Result};
use crate::tokens::TokenCounter;

/// Persisted form of a session. The system prompt is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: u32,
    pub messages: Vec<Message>,
    pub total_usage: Usage,
}

impl SessionSnapshot {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Session(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// A live conversation: identity, turn count and history
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    turn_count: u32,
    context: ContextManager,
}

impl Session {
    pub fn new(context: ContextManager) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            turn_count: 0,
            context,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Turns run over the lifetime of the session
    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextManager {
        &mut self.context
    }

    pub(crate) fn record_turn(&mut self) {
        self.turn_count += 1;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            turn_count: self.turn_count,
            messages: self.context.messages().to_vec(),
            total_usage: *self.context.total_usage(),
        }
    }

    /// Rebuild a session by replaying the snapshot's messages through the
    /// normal append path under a freshly supplied system prompt
    pub fn restore(
        snapshot: SessionSnapshot,
        system_prompt: Option<String>,
        counter: TokenCounter,
    ) -> Self {
        let mut context = ContextManager::new(counter);
        context.set_system_prompt(system_prompt);
        for message in snapshot.messages {
            if message.role == Role::System {
                continue;
            }
            context.append(message);
        }
        context.restore_total_usage(snapshot.total_usage);

        tracing::info!(
            session = %snapshot.session_id,
            messages = context.len(),
            "Restored session"
        );

        Self {
            id: snapshot.session_id,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            turn_count: snapshot.turn_count,
            context,
        }
    }
}
