//! # sitegen-core
//!
//! Core logic for sitegen, a conversational website generator.
//!
//! This crate is transport-agnostic and can be used by:
//! - the HTTP API (`sitegen-http`)
//! - the daemon binary (`sitegen-daemon`)
//! - tests, with the mock backends in [`agents::mock`]
//!
//! ## Key Concepts
//!
//! - **Session**: a directory of artifacts named by a client-chosen id
//! - **Agent**: a stateful conversation with a model, one per role per session
//! - **Template**: the generated HTML page, absent while it is being rebuilt

pub mod agents;
pub mod markup;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod tasks;

// Re-export commonly used types
pub use agents::{AgentError, AgentRole, ChatMessage, DefaultAgentFactory};
pub use orchestrator::{Attachment, OrchestratorError, OutputStatus, SessionOrchestrator};
pub use persistence::{ArtifactStore, FsArtifactStore, SessionDetails, StoreError};
pub use registry::{AgentRegistry, RegistryPolicy};
pub use session::{SessionCatalog, SessionId, SessionIdError};
pub use tasks::TaskRunner;
