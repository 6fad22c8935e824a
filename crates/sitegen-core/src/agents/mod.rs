//! Conversational and generative agents.
//!
//! Every session owns one agent per [`AgentRole`]. The chat roles
//! (orchestrator, template, title) share the [`Agent`] trait and differ only
//! in their system prompt; the image role is an [`ImageAgent`].
//!
//! Network access sits behind two seams so tests and offline runs can swap
//! it out:
//!
//! - [`LlmClient`] - chat completions
//! - [`ImageBackend`] - image generation and download
//!
//! [`OpenAiClient`] implements both against an OpenAI-compatible API;
//! [`mock`] has canned implementations.

pub mod chat;
pub mod image;
pub mod mock;
pub mod openai;
pub mod prompts;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chat::ChatAgent;
pub use image::{GeneratedImage, ImageAgent};
pub use openai::{OpenAiClient, OpenAiConfig};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent request failed: {0}")]
    Request(String),

    #[error("Unexpected agent response: {0}")]
    Response(String),

    #[error("Invalid agent state: {0}")]
    State(String),

    #[error("Agent lock poisoned")]
    Poisoned,
}

/// The fixed set of agents a session owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentRole {
    Orchestrator,
    Template,
    Title,
    ImageGenerator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Orchestrator,
        AgentRole::Template,
        AgentRole::Title,
        AgentRole::ImageGenerator,
    ];

    /// File stem of the persisted state under `agents/`.
    pub fn file_stem(&self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator_agent",
            AgentRole::Template => "template_agent",
            AgentRole::Title => "title_agent",
            AgentRole::ImageGenerator => "image_gen_agent",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One entry in an agent transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A stateful conversational agent.
pub trait Agent: Send {
    fn role(&self) -> AgentRole;

    /// Send a prompt (plus optional attached file) and return the reply.
    ///
    /// Blocks on the network; call it off the async executor.
    fn send_prompt(&mut self, prompt: &str, file: Option<&[u8]>) -> Result<String, AgentError>;

    /// Conversation so far, oldest first.
    fn messages(&self) -> Vec<ChatMessage>;

    /// Forget the conversation.
    fn reset(&mut self);

    fn export_state(&self) -> Result<String, AgentError>;

    /// Replace in-memory state with a previously exported one. Leaves the
    /// agent untouched on error.
    fn restore_state(&mut self, state: &str) -> Result<(), AgentError>;
}

/// One chat completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub role: AgentRole,
    pub system_prompt: &'a str,
    pub messages: &'a [ChatMessage],
}

/// Chat completion backend.
pub trait LlmClient: Send + Sync {
    fn complete(&self, request: CompletionRequest<'_>) -> Result<String, AgentError>;
}

/// Image generation backend.
pub trait ImageBackend: Send + Sync {
    /// Generate an image and return its URL.
    fn generate(&self, prompt: &str) -> Result<String, AgentError>;

    /// Fetch the bytes behind a generated image URL.
    fn download(&self, url: &str) -> Result<Vec<u8>, AgentError>;
}

/// Builds fresh agents for a session.
pub trait AgentFactory: Send + Sync {
    fn chat_agent(&self, role: AgentRole) -> Box<dyn Agent>;

    fn image_agent(&self) -> ImageAgent;
}

/// Factory binding every chat role to one [`LlmClient`] and the image role
/// to one [`ImageBackend`].
#[derive(Clone)]
pub struct DefaultAgentFactory {
    llm: Arc<dyn LlmClient>,
    images: Arc<dyn ImageBackend>,
}

impl DefaultAgentFactory {
    pub fn new(llm: Arc<dyn LlmClient>, images: Arc<dyn ImageBackend>) -> Self {
        Self { llm, images }
    }
}

impl AgentFactory for DefaultAgentFactory {
    fn chat_agent(&self, role: AgentRole) -> Box<dyn Agent> {
        Box::new(ChatAgent::new(
            role,
            prompts::system_prompt(role),
            Arc::clone(&self.llm),
        ))
    }

    fn image_agent(&self) -> ImageAgent {
        ImageAgent::new(Arc::clone(&self.images))
    }
}
