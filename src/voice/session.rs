use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::agents::Agent;

/// Number of prior transcript turns replayed into each prompt.
const TRANSCRIPT_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "ユーザー",
            Role::Assistant => "アシスタント",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Voice assistant agent plus the linear transcript of the conversation.
///
/// A user/assistant pair is recorded only after the agent answers, so a
/// failed call leaves the transcript untouched.
pub struct VoiceAgentSession {
    agent: Arc<dyn Agent>,
    history: Mutex<Vec<ConversationTurn>>,
}

impl VoiceAgentSession {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            history: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConversationTurn>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn send_message(&self, user_input: &str) -> Result<String> {
        let prompt = build_session_prompt(&self.history(), user_input);
        let reply = self.agent.invoke(&prompt).await?;

        let mut history = self.lock();
        history.push(ConversationTurn::user(user_input));
        history.push(ConversationTurn::assistant(reply.clone()));
        Ok(reply)
    }

    /// Snapshot copy of the transcript.
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
        tracing::info!("conversation history cleared");
    }

    /// Number of user utterances answered so far.
    pub fn turn_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|turn| turn.role == Role::User)
            .count()
    }
}

#[async_trait]
impl Agent for VoiceAgentSession {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.send_message(prompt).await
    }
}

/// The new message, preceded by the recent transcript when there is one.
pub fn build_session_prompt(history: &[ConversationTurn], user_input: &str) -> String {
    if history.is_empty() {
        return user_input.to_string();
    }

    let start = history.len().saturating_sub(TRANSCRIPT_WINDOW);
    let mut prompt = String::from("【これまでの会話】\n");
    for turn in &history[start..] {
        prompt.push_str(&format!("{}: {}\n", turn.role.label(), turn.content));
    }
    prompt.push_str("\n【ユーザーの新しい発話】\n");
    prompt.push_str(user_input);
    prompt
}
