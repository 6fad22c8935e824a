//! HTTP API for sitegen.
//!
//! Exposes prompt submission, output polling, asset serving and session
//! history over REST. The client build can be served from a static directory.

mod routes;
mod state;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub use routes::{ApiError, PromptForm};
pub use state::{SharedState, DEFAULT_MAX_UPLOAD_BYTES};

/// Build the application router.
pub fn router(state: Arc<SharedState>, static_dir: Option<PathBuf>) -> Router {
    let body_limit = state.max_upload_bytes;

    let mut app = Router::new()
        .route("/sendprompt/{session_id}", post(routes::send_prompt))
        .route("/getoutput/{session_id}", post(routes::get_output))
        .route("/jobs/{session_id}/{filename}", get(routes::serve_asset))
        .route("/getimage/{session_id}", post(routes::get_image))
        .route(
            "/image_readycheck/{session_id}",
            get(routes::image_ready_check),
        )
        .route("/messages/{session_id}", get(routes::get_messages))
        .route("/newchat/{session_id}", post(routes::new_chat))
        .route("/sessiondetails/{session_id}", get(routes::session_details))
        .route("/sessionhistory", get(routes::session_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Serve the client build if a directory was provided
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(
    state: Arc<SharedState>,
    addr: SocketAddr,
    static_dir: Option<PathBuf>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, static_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("HTTP server shutting down");
        })
        .await
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use sitegen_core::agents::mock::{MockImageBackend, MockLlmClient};
    use sitegen_core::{
        AgentRegistry, DefaultAgentFactory, FsArtifactStore, RegistryPolicy, SessionCatalog,
        SessionOrchestrator, TaskRunner,
    };
    use tempfile::{tempdir, TempDir};
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    fn make_state() -> (TempDir, Arc<SharedState>) {
        let tmp = tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(tmp.path().join("jobs")));
        let factory = Arc::new(DefaultAgentFactory::new(
            Arc::new(MockLlmClient::replying("ok")),
            Arc::new(MockImageBackend::new("http://img/bg.png")),
        ));
        let registry = Arc::new(AgentRegistry::new(
            store.clone(),
            factory,
            RegistryPolicy::unbounded(),
        ));
        let (runner, _reports) = TaskRunner::with_reports();
        let orchestrator = Arc::new(SessionOrchestrator::new(store.clone(), registry, runner));
        let catalog = Arc::new(SessionCatalog::new(store));
        (tmp, Arc::new(SharedState::new(orchestrator, catalog)))
    }

    #[tokio::test]
    async fn serves_static_fallback() {
        let (tmp, state) = make_state();
        let static_dir = tmp.path().join("client");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("app.js"), "console.log(1)").unwrap();

        let app = router(state, Some(static_dir));
        let response = app
            .oneshot(Request::get("/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404_without_static_dir() {
        let (_tmp, state) = make_state();
        let response = router(state, None)
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let (_tmp, state) = make_state();
        let request = Request::get("/sessionhistory")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = router(state, None).oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn oversized_form_is_rejected() {
        let (_tmp, state) = make_state();
        let state = Arc::new((*state).clone().with_max_upload_bytes(16));
        let request = Request::post("/sendprompt/s1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("prompt={}", "x".repeat(64))))
            .unwrap();
        let response = router(state, None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn server_starts_and_stops() {
        let (_tmp, state) = make_state();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let server = tokio::spawn(serve(state, addr, None, async {
            shutdown_rx.await.ok();
        }));

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
