//! OpenAI-compatible HTTP backend.
//!
//! Uses blocking `ureq` calls; callers run them on a blocking thread.
//!
//! - `POST {api_base}/chat/completions` for chat roles
//! - `POST {api_base}/images/generations` for the image role
//! - `GET {url}` to download a generated image

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{AgentError, CompletionRequest, ImageBackend, LlmClient, MessageRole};

/// Generated images larger than this are rejected on download.
const MAX_IMAGE_BYTES: u64 = 32 * 1024 * 1024;

/// Connection settings for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub image_model: String,
    pub image_size: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            chat_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1792x1024".to_string(),
            timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Client for chat completions and image generation.
pub struct OpenAiClient {
    config: OpenAiConfig,
    http: ureq::Agent,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        let http = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, http }
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value, AgentError> {
        let mut request = self.http.post(&self.endpoint(path));
        if let Some(key) = &self.config.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        let response = request.send_json(body).map_err(|e| match e {
            ureq::Error::Status(code, response) => {
                let detail = response.into_string().unwrap_or_default();
                AgentError::Request(format!("{path} returned {code}: {detail}"))
            }
            other => AgentError::Request(format!("{path}: {other}")),
        })?;

        response
            .into_json()
            .map_err(|e| AgentError::Response(format!("{path}: {e}")))
    }
}

fn chat_body(model: &str, request: &CompletionRequest<'_>) -> Value {
    let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
    messages.extend(request.messages.iter().map(|m| {
        let role = match m.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        json!({"role": role, "content": m.content})
    }));
    json!({"model": model, "messages": messages})
}

fn parse_chat_response(body: Value) -> Result<String, AgentError> {
    let response: ChatCompletionResponse =
        serde_json::from_value(body).map_err(|e| AgentError::Response(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AgentError::Response("completion had no content".to_string()))
}

fn parse_image_response(body: Value) -> Result<String, AgentError> {
    let response: ImageGenerationResponse =
        serde_json::from_value(body).map_err(|e| AgentError::Response(e.to_string()))?;
    response
        .data
        .into_iter()
        .next()
        .and_then(|d| d.url)
        .ok_or_else(|| AgentError::Response("image response had no url".to_string()))
}

impl LlmClient for OpenAiClient {
    fn complete(&self, request: CompletionRequest<'_>) -> Result<String, AgentError> {
        log::debug!(
            "chat completion for {} ({} messages)",
            request.role,
            request.messages.len()
        );
        let body = self.post_json("chat/completions", &chat_body(&self.config.chat_model, &request))?;
        parse_chat_response(body)
    }
}

impl ImageBackend for OpenAiClient {
    fn generate(&self, prompt: &str) -> Result<String, AgentError> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": prompt,
            "n": 1,
            "size": self.config.image_size,
        });
        parse_image_response(self.post_json("images/generations", &body)?)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, AgentError> {
        let response = self
            .http
            .get(url)
            .call()
            .map_err(|e| AgentError::Request(format!("download {url}: {e}")))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| AgentError::Response(format!("download {url}: {e}")))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRole, ChatMessage};

    #[test]
    fn chat_body_prepends_system_prompt() {
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let request = CompletionRequest {
            role: AgentRole::Orchestrator,
            system_prompt: "sys",
            messages: &messages,
        };
        let body = chat_body("gpt-test", &request);

        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn parse_chat_response_takes_first_choice() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "hey"}}]});
        assert_eq!(parse_chat_response(body).unwrap(), "hey");
    }

    #[test]
    fn parse_chat_response_without_choices_fails() {
        let body = json!({"choices": []});
        assert!(matches!(
            parse_chat_response(body),
            Err(AgentError::Response(_))
        ));
    }

    #[test]
    fn parse_image_response_takes_first_url() {
        let body = json!({"created": 1, "data": [{"url": "https://img/x.png"}]});
        assert_eq!(parse_image_response(body).unwrap(), "https://img/x.png");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = OpenAiClient::new(OpenAiConfig {
            api_base: "http://localhost:8080/v1/".to_string(),
            ..OpenAiConfig::default()
        });
        assert_eq!(
            client.endpoint("chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
