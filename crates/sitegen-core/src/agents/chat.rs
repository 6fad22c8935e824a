//! Transcript-keeping chat agent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Agent, AgentError, AgentRole, ChatMessage, CompletionRequest, LlmClient};

/// Persisted form of a [`ChatAgent`] (`agents/{role}.json`).
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatAgentState {
    messages: Vec<ChatMessage>,
}

/// Chat agent with a fixed system prompt and a growing transcript.
pub struct ChatAgent {
    role: AgentRole,
    system_prompt: String,
    client: Arc<dyn LlmClient>,
    messages: Vec<ChatMessage>,
}

impl ChatAgent {
    pub fn new(role: AgentRole, system_prompt: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        Self {
            role,
            system_prompt: system_prompt.into(),
            client,
            messages: Vec::new(),
        }
    }

    /// Inline an attachment after the prompt text.
    fn compose_user_content(prompt: &str, file: Option<&[u8]>) -> String {
        match file {
            Some(bytes) if !bytes.is_empty() => format!(
                "{prompt}\n\nAttached file contents:\n{}",
                String::from_utf8_lossy(bytes)
            ),
            _ => prompt.to_string(),
        }
    }
}

impl Agent for ChatAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    fn send_prompt(&mut self, prompt: &str, file: Option<&[u8]>) -> Result<String, AgentError> {
        self.messages
            .push(ChatMessage::user(Self::compose_user_content(prompt, file)));

        let result = self.client.complete(CompletionRequest {
            role: self.role,
            system_prompt: &self.system_prompt,
            messages: &self.messages,
        });

        match result {
            Ok(reply) => {
                self.messages.push(ChatMessage::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                // Keep the transcript free of unanswered prompts
                self.messages.pop();
                Err(e)
            }
        }
    }

    fn messages(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    fn reset(&mut self) {
        self.messages.clear();
    }

    fn export_state(&self) -> Result<String, AgentError> {
        let state = ChatAgentState {
            messages: self.messages.clone(),
        };
        serde_json::to_string_pretty(&state).map_err(|e| AgentError::State(e.to_string()))
    }

    fn restore_state(&mut self, state: &str) -> Result<(), AgentError> {
        let state: ChatAgentState =
            serde_json::from_str(state).map_err(|e| AgentError::State(e.to_string()))?;
        self.messages = state.messages;
        Ok(())
    }
}
