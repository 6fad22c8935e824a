//! sitegen daemon: serves the website generator API.

mod offline;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sitegen_core::agents::{ImageBackend, LlmClient, OpenAiClient, OpenAiConfig};
use sitegen_core::{
    AgentRegistry, ArtifactStore, DefaultAgentFactory, FsArtifactStore, RegistryPolicy,
    SessionCatalog, SessionOrchestrator, TaskRunner,
};
use sitegen_http::SharedState;

#[derive(Parser, Debug)]
#[command(name = "sitegen")]
#[command(about = "Conversational website generator server")]
#[command(version)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "SITEGEN_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the HTTP server to
    #[arg(short, long, env = "SITEGEN_PORT", default_value_t = 5000)]
    port: u16,

    /// Root directory for session artifacts
    #[arg(long, env = "SITEGEN_JOBS_DIR", default_value = "jobs")]
    jobs_dir: PathBuf,

    /// Serve the client build from this directory
    #[arg(long, env = "SITEGEN_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Base URL used in template links (defaults to the request's Host)
    #[arg(long, env = "SITEGEN_PUBLIC_URL")]
    public_url: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    api_base: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "SITEGEN_CHAT_MODEL", default_value = "gpt-4o")]
    chat_model: String,

    #[arg(long, env = "SITEGEN_IMAGE_MODEL", default_value = "dall-e-3")]
    image_model: String,

    #[arg(long, env = "SITEGEN_IMAGE_SIZE", default_value = "1792x1024")]
    image_size: String,

    /// Seconds before an API call is abandoned
    #[arg(long, env = "SITEGEN_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Keep at most this many sessions' agents in memory
    #[arg(long, env = "SITEGEN_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Seconds to wait for background jobs after the server stops
    #[arg(long, env = "SITEGEN_SHUTDOWN_GRACE", default_value_t = 60)]
    shutdown_grace: u64,

    /// Largest accepted request body, in megabytes
    #[arg(long, env = "SITEGEN_MAX_UPLOAD_MB", default_value_t = 25)]
    max_upload_mb: usize,

    /// Use canned local backends instead of the network
    #[arg(long)]
    offline: bool,
}

impl Args {
    fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("Invalid address: {}", e))
    }

    fn registry_policy(&self) -> RegistryPolicy {
        match self.max_sessions {
            Some(max) => RegistryPolicy::bounded(max),
            None => RegistryPolicy::unbounded(),
        }
    }

    fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_base: self.api_base.trim_end_matches('/').to_string(),
            api_key: self.api_key.clone().filter(|key| !key.is_empty()),
            chat_model: self.chat_model.clone(),
            image_model: self.image_model.clone(),
            image_size: self.image_size.clone(),
            timeout: Duration::from_secs(self.api_timeout),
        }
    }

    fn backends(&self) -> Result<(Arc<dyn LlmClient>, Arc<dyn ImageBackend>), String> {
        if self.offline {
            log::warn!("Running offline with canned agent replies");
            return Ok(offline::backends());
        }

        let config = self.openai_config();
        if config.api_key.is_none() {
            return Err("No API key: set OPENAI_API_KEY or pass --offline".to_string());
        }
        log::info!(
            "Using {} (chat: {}, images: {})",
            config.api_base,
            config.chat_model,
            config.image_model
        );
        let client = Arc::new(OpenAiClient::new(config));
        let llm: Arc<dyn LlmClient> = client.clone();
        let images: Arc<dyn ImageBackend> = client;
        Ok((llm, images))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let addr = args.socket_addr()?;
    let (llm, images) = args.backends()?;

    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&args.jobs_dir));
    let factory = Arc::new(DefaultAgentFactory::new(llm, images));
    let registry = Arc::new(AgentRegistry::new(
        Arc::clone(&store),
        factory,
        args.registry_policy(),
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&store),
        registry,
        TaskRunner::new(),
    ));
    let catalog = Arc::new(SessionCatalog::new(store));

    let state = SharedState::new(Arc::clone(&orchestrator), catalog)
        .with_public_url(args.public_url.clone())
        .with_max_upload_bytes(args.max_upload_mb.saturating_mul(1024 * 1024));

    log::info!("Storing sessions in {}", args.jobs_dir.display());
    sitegen_http::serve(
        Arc::new(state),
        addr,
        args.static_dir.clone(),
        shutdown_signal(),
    )
    .await?;

    // Let in-flight template and title jobs land on disk
    let grace = Duration::from_secs(args.shutdown_grace);
    if !orchestrator.wait_idle_timeout(grace).await {
        log::warn!(
            "Exiting with {} background jobs unfinished",
            orchestrator.jobs_in_flight()
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
