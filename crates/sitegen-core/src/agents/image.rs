//! Image generation agent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentError, ImageBackend};

/// A previously generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub prompt: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageAgentState {
    images: Vec<GeneratedImage>,
}

/// Generates images and remembers what it generated.
pub struct ImageAgent {
    backend: Arc<dyn ImageBackend>,
    images: Vec<GeneratedImage>,
}

impl ImageAgent {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            backend,
            images: Vec::new(),
        }
    }

    /// Generate an image for `prompt` and return its URL.
    pub fn generate_image(&mut self, prompt: &str) -> Result<String, AgentError> {
        let url = self.backend.generate(prompt)?;
        self.images.push(GeneratedImage {
            prompt: prompt.to_string(),
            url: url.clone(),
            created_at: Utc::now(),
        });
        Ok(url)
    }

    /// A handle to the backend, for downloads that should not hold the agent.
    pub fn backend(&self) -> Arc<dyn ImageBackend> {
        Arc::clone(&self.backend)
    }

    pub fn images(&self) -> &[GeneratedImage] {
        &self.images
    }

    pub fn export_state(&self) -> Result<String, AgentError> {
        let state = ImageAgentState {
            images: self.images.clone(),
        };
        serde_json::to_string_pretty(&state).map_err(|e| AgentError::State(e.to_string()))
    }

    pub fn restore_state(&mut self, state: &str) -> Result<(), AgentError> {
        let state: ImageAgentState =
            serde_json::from_str(state).map_err(|e| AgentError::State(e.to_string()))?;
        self.images = state.images;
        Ok(())
    }
}
