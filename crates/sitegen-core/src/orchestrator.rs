//! SessionOrchestrator - request handling for prompts, output polling and
//! conversation management.
//!
//! # Prompt Flow
//!
//! 1. Validate the prompt
//! 2. Deprecate the current template (readers now see "not ready")
//! 3. Resolve the session's agents
//! 4. Store the attachment, if any
//! 5. Ask the orchestrator agent and persist its state (the caller waits)
//! 6. Schedule the title and template jobs (the caller does not wait)
//!
//! Step 2 runs before step 6 is scheduled, so the template job's write is
//! always the one that ends the "not ready" window.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::agents::{prompts, AgentError, AgentRole, ChatMessage};
use crate::markup::{extract_title, trim_markdown};
use crate::persistence::{ArtifactStore, SessionDetails, StoreError, BACKGROUND_IMAGE};
use crate::registry::{AgentRegistry, SharedAgent};
use crate::session::SessionId;
use crate::tasks::{JobKind, TaskRunner};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// A file uploaded alongside a prompt.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Result of polling for the generated page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    NotReady,
    Ready { html: String },
}

pub struct SessionOrchestrator {
    store: Arc<dyn ArtifactStore>,
    registry: Arc<AgentRegistry>,
    runner: TaskRunner,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        registry: Arc<AgentRegistry>,
        runner: TaskRunner,
    ) -> Self {
        Self {
            store,
            registry,
            runner,
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Handle a prompt and return the orchestrator agent's reply.
    ///
    /// Template and title regeneration continue in the background after
    /// this returns. Nothing is rolled back if a later step fails.
    pub async fn handle_prompt(
        &self,
        session_id: &SessionId,
        prompt: Option<&str>,
        attachment: Option<Attachment>,
    ) -> Result<String, OrchestratorError> {
        let prompt = require_prompt(prompt)?;
        log::info!("Prompt received for session {}", session_id);

        let (agents, file, reply) = {
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&self.registry);
            let id = session_id.clone();
            let prompt = prompt.clone();
            run_blocking(move || {
                store.session_dir(&id)?;
                store.deprecate_template(&id)?;

                let agents = registry.get_or_create(&id);

                let file = match attachment {
                    Some(attachment) => Some(Arc::new(store.save_upload(
                        &id,
                        &attachment.filename,
                        &attachment.bytes,
                    )?)),
                    None => None,
                };

                let reply = prompt_and_persist(
                    store.as_ref(),
                    &id,
                    agents.orchestrator(),
                    &prompt,
                    file.as_deref().map(Vec::as_slice),
                )?;
                Ok((agents, file, reply))
            })
            .await?
        };

        self.schedule_title(session_id, agents.title(), &prompt, file.clone());
        self.schedule_template(session_id, agents.template(), &prompt, file);

        Ok(reply)
    }

    /// Current page, or `NotReady` while it is being regenerated.
    pub async fn get_output(
        &self,
        session_id: &SessionId,
    ) -> Result<OutputStatus, OrchestratorError> {
        let store = Arc::clone(&self.store);
        let id = session_id.clone();
        run_blocking(move || {
            Ok(match store.read_template(&id)? {
                Some(html) => OutputStatus::Ready { html },
                None => OutputStatus::NotReady,
            })
        })
        .await
    }

    /// The orchestrator agent's transcript.
    pub async fn get_messages(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ChatMessage>, OrchestratorError> {
        let registry = Arc::clone(&self.registry);
        let id = session_id.clone();
        run_blocking(move || {
            let agents = registry.get_or_create(&id);
            let agent = agents.orchestrator().lock().map_err(|_| AgentError::Poisoned)?;
            Ok(agent.messages())
        })
        .await
    }

    /// Start a new conversation with the orchestrator and template agents.
    ///
    /// Title and image agents keep their state; no file is deleted. The reset
    /// state is persisted so a restart does not bring the old chat back.
    pub async fn new_chat(&self, session_id: &SessionId) -> Result<(), OrchestratorError> {
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);
        let id = session_id.clone();

        run_blocking(move || {
            let agents = registry.reset(&id)?;
            for agent in [agents.orchestrator(), agents.template()] {
                let (role, state) = {
                    let agent = agent.lock().map_err(|_| AgentError::Poisoned)?;
                    (agent.role(), agent.export_state()?)
                };
                store.write_agent_state(&id, role, &state)?;
            }
            Ok(())
        })
        .await?;

        log::info!("New chat started for session {}", session_id);
        Ok(())
    }

    /// Generate a background image for the session and return its URL.
    ///
    /// The image is downloaded to `images/background.png`; a failed download
    /// is logged and does not fail the call.
    pub async fn generate_image(
        &self,
        session_id: &SessionId,
        prompt: Option<&str>,
    ) -> Result<String, OrchestratorError> {
        let prompt = require_prompt(prompt)?;
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);
        let id = session_id.clone();

        run_blocking(move || {
            let agents = registry.get_or_create(&id);
            let (url, state, backend) = {
                let mut agent = agents.image().lock().map_err(|_| AgentError::Poisoned)?;
                let url = agent.generate_image(&prompts::image_request(&prompt))?;
                (url, agent.export_state()?, agent.backend())
            };
            store.write_agent_state(&id, AgentRole::ImageGenerator, &state)?;

            let saved = backend
                .download(&url)
                .map_err(OrchestratorError::from)
                .and_then(|bytes| Ok(store.save_image(&id, &bytes, BACKGROUND_IMAGE)?));
            match saved {
                Ok(()) => log::info!("Saved {} for session {}", BACKGROUND_IMAGE, id),
                Err(e) => log::warn!("Could not store image for session {}: {}", id, e),
            }

            Ok(url)
        })
        .await
    }

    pub fn images_ready(&self, session_id: &SessionId) -> bool {
        self.store.image_exists(session_id, BACKGROUND_IMAGE)
    }

    /// Wait for every scheduled background job to finish.
    pub async fn wait_idle(&self) {
        self.runner.wait_idle().await;
    }

    /// [`wait_idle`](Self::wait_idle) bounded by `timeout`; `false` if jobs
    /// were still running when it expired.
    pub async fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        self.runner.wait_idle_timeout(timeout).await
    }

    pub fn jobs_in_flight(&self) -> usize {
        self.runner.in_flight()
    }

    fn schedule_title(
        &self,
        session_id: &SessionId,
        agent: &SharedAgent,
        prompt: &str,
        file: Option<Arc<Vec<u8>>>,
    ) {
        let store = Arc::clone(&self.store);
        let agent = Arc::clone(agent);
        let id = session_id.clone();
        let prompt = prompt.to_string();

        self.runner.spawn(JobKind::Title, session_id.clone(), move || {
            let file = file.as_deref().map(Vec::as_slice);
            generate_details(store.as_ref(), &id, &agent, &prompt, file).map(|_| ())
        });
    }

    fn schedule_template(
        &self,
        session_id: &SessionId,
        agent: &SharedAgent,
        prompt: &str,
        file: Option<Arc<Vec<u8>>>,
    ) {
        let store = Arc::clone(&self.store);
        let agent = Arc::clone(agent);
        let id = session_id.clone();
        let prompt = prompt.to_string();

        self.runner.spawn(JobKind::Template, session_id.clone(), move || {
            let file = file.as_deref().map(Vec::as_slice);
            regenerate_template(store.as_ref(), &id, &agent, &prompt, file)
        });
    }
}

fn require_prompt(prompt: Option<&str>) -> Result<String, OrchestratorError> {
    match prompt {
        Some(p) if !p.trim().is_empty() => Ok(p.to_string()),
        _ => Err(OrchestratorError::InvalidRequest(
            "No prompt provided".to_string(),
        )),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, OrchestratorError>
where
    F: FnOnce() -> Result<T, OrchestratorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OrchestratorError::Task(e.to_string()))?
}

/// Prompt an agent, then persist its new state.
fn prompt_and_persist(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    agent: &SharedAgent,
    prompt: &str,
    file: Option<&[u8]>,
) -> Result<String, OrchestratorError> {
    let (role, reply, state) = {
        let mut agent = agent.lock().map_err(|_| AgentError::Poisoned)?;
        let reply = agent.send_prompt(prompt, file)?;
        (agent.role(), reply, agent.export_state()?)
    };
    store.write_agent_state(session_id, role, &state)?;
    Ok(reply)
}

/// Template job: ask the template agent and publish the cleaned page.
fn regenerate_template(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    agent: &SharedAgent,
    prompt: &str,
    file: Option<&[u8]>,
) -> Result<(), OrchestratorError> {
    let html = prompt_and_persist(store, session_id, agent, prompt, file)?;
    store.write_template(session_id, &trim_markdown(&html))?;
    Ok(())
}

/// Title job: name the session once. Returns whether `details.json` was
/// written by this call.
fn generate_details(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    agent: &SharedAgent,
    prompt: &str,
    file: Option<&[u8]>,
) -> Result<bool, OrchestratorError> {
    if store.has_details(session_id) {
        return Ok(false);
    }

    let request = prompts::title_request(prompt);
    let title = match prompt_and_persist(store, session_id, agent, &request, file) {
        Ok(response) => extract_title(&response),
        Err(e) => {
            log::warn!("Title generation failed for session {}: {}", session_id, e);
            String::new()
        }
    };
    // An unusable title still records the session, named by its id
    let title = if title.is_empty() {
        session_id.to_string()
    } else {
        title
    };

    let details = SessionDetails::new(title, session_id.clone());
    Ok(store.write_details_once(session_id, &details)?)
}

// ============================================================================
// TESTS
// ============================================================================
