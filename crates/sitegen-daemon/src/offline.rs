//! Canned backends for `--offline`: the full request flow without network
//! access or an API key.

use std::sync::Arc;

use sitegen_core::agents::mock::{MockImageBackend, MockLlmClient};
use sitegen_core::agents::{CompletionRequest, ImageBackend, LlmClient};
use sitegen_core::{AgentError, AgentRole};

pub fn backends() -> (Arc<dyn LlmClient>, Arc<dyn ImageBackend>) {
    let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::from_fn(respond));
    let images: Arc<dyn ImageBackend> = Arc::new(MockImageBackend::new("offline://background.png"));
    (llm, images)
}

fn respond(request: CompletionRequest<'_>) -> Result<String, AgentError> {
    let prompt = request
        .messages
        .last()
        .map(|message| message.content.as_str())
        .unwrap_or_default();

    Ok(match request.role {
        AgentRole::Orchestrator => format!("(offline) Noted: {}", prompt),
        AgentRole::Template => format!(
            "```html\n<!DOCTYPE html>\n<html><body><h1>Offline preview</h1><p>{}</p></body></html>\n```",
            escape_html(prompt)
        ),
        AgentRole::Title => "{Offline Site}".to_string(),
        AgentRole::ImageGenerator => String::new(),
    })
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
