//! HTTP route handlers.
//!
//! Every JSON failure body has the shape `{error}`. Invalid request data maps
//! to 400, a missing asset to 404, anything else to 500.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Form,
};
use serde::Serialize;
use sitegen_core::persistence::{StoreError, TEMPLATE_FILE};
use sitegen_core::{Attachment, ChatMessage, OrchestratorError, OutputStatus, SessionId};

use super::SharedState;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
pub struct PromptReply {
    pub response: String,
}

/// Body of `/getoutput`.
#[derive(Serialize)]
#[serde(tag = "status")]
pub enum OutputReply {
    #[serde(rename = "not ready")]
    NotReady,
    #[serde(rename = "ready")]
    Ready {
        htmldata: String,
        templateurl: String,
    },
}

#[derive(Serialize)]
pub struct ImageReply {
    pub image: String,
}

#[derive(Serialize)]
pub struct ImagesReadyReply {
    pub images_ready: bool,
}

#[derive(Serialize)]
pub struct MessagesReply {
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct NoticeReply {
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// A failed request, rendered as `{error}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("Request failed: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::InvalidRequest(message) => Self::bad_request(message),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

fn parse_session(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

// ============================================================================
// FORM EXTRACTION
// ============================================================================

/// Prompt fields of a `multipart/form-data` or urlencoded form body.
///
/// The prompt is optional here; handlers decide whether it is required.
#[derive(Debug, Default)]
pub struct PromptForm {
    pub prompt: Option<String>,
    pub attachment: Option<Attachment>,
}

impl<S> FromRequest<S> for PromptForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            read_multipart(multipart).await
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(mut fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            Ok(PromptForm {
                prompt: fields.remove("prompt"),
                attachment: None,
            })
        } else {
            Ok(PromptForm::default())
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<PromptForm, ApiError> {
    let mut form = PromptForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("prompt") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                form.prompt = Some(text);
            }
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                // Browsers send an empty part when no file was picked
                if let Some(filename) = filename.filter(|name| !name.is_empty()) {
                    form.attachment = Some(Attachment {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Handler for POST /sendprompt/{session_id}
pub async fn send_prompt(
    Path(raw_id): Path<String>,
    State(state): State<Arc<SharedState>>,
    form: PromptForm,
) -> Result<Json<PromptReply>, ApiError> {
    log::debug!("HTTP sendprompt: {}", raw_id);
    let session_id = parse_session(&raw_id)?;
    let response = state
        .orchestrator
        .handle_prompt(&session_id, form.prompt.as_deref(), form.attachment)
        .await?;
    Ok(Json(PromptReply { response }))
}

/// Handler for POST /getoutput/{session_id}
pub async fn get_output(
    Path(raw_id): Path<String>,
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
) -> Result<Json<OutputReply>, ApiError> {
    log::debug!("HTTP getoutput: {}", raw_id);
    let session_id = parse_session(&raw_id)?;
    let reply = match state.orchestrator.get_output(&session_id).await? {
        OutputStatus::NotReady => OutputReply::NotReady,
        OutputStatus::Ready { html } => OutputReply::Ready {
            htmldata: html,
            templateurl: format!(
                "{}/jobs/{}/{}",
                base_url(&state, &headers),
                session_id,
                TEMPLATE_FILE
            ),
        },
    };
    Ok(Json(reply))
}

/// Handler for GET /jobs/{session_id}/{filename}
pub async fn serve_asset(
    Path((raw_id, filename)): Path<(String, String)>,
    State(state): State<Arc<SharedState>>,
) -> Result<Response, ApiError> {
    log::debug!("HTTP jobs: {}/{}", raw_id, filename);
    let not_found = || ApiError::not_found(format!("File not found: {}", filename));

    let Ok(session_id) = SessionId::parse(raw_id) else {
        return Err(not_found());
    };

    let store = Arc::clone(state.orchestrator.store());
    let name = filename.clone();
    let read = blocking(move || store.read_asset(&session_id, &name)).await?;

    match read {
        Ok(Some(bytes)) => {
            let mime = mime_guess::from_path(&filename).first_or_octet_stream();
            Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
        }
        Ok(None) | Err(StoreError::InvalidName(_)) => Err(not_found()),
        Err(e) => Err(e.into()),
    }
}

/// Handler for POST /getimage/{session_id}
pub async fn get_image(
    Path(raw_id): Path<String>,
    State(state): State<Arc<SharedState>>,
    form: PromptForm,
) -> Result<Json<ImageReply>, ApiError> {
    log::debug!("HTTP getimage: {}", raw_id);
    let session_id = parse_session(&raw_id)?;
    let image = state
        .orchestrator
        .generate_image(&session_id, form.prompt.as_deref())
        .await?;
    Ok(Json(ImageReply { image }))
}

/// Handler for GET /image_readycheck/{session_id}
pub async fn image_ready_check(
    Path(raw_id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Result<Json<ImagesReadyReply>, ApiError> {
    let session_id = parse_session(&raw_id)?;
    Ok(Json(ImagesReadyReply {
        images_ready: state.orchestrator.images_ready(&session_id),
    }))
}

/// Handler for GET /messages/{session_id}
pub async fn get_messages(
    Path(raw_id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Result<Json<MessagesReply>, ApiError> {
    log::debug!("HTTP messages: {}", raw_id);
    let session_id = parse_session(&raw_id)?;
    let messages = state.orchestrator.get_messages(&session_id).await?;
    Ok(Json(MessagesReply { messages }))
}

/// Handler for POST /newchat/{session_id}
pub async fn new_chat(
    Path(raw_id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Result<Json<NoticeReply>, ApiError> {
    log::debug!("HTTP newchat: {}", raw_id);
    let session_id = parse_session(&raw_id)?;
    state.orchestrator.new_chat(&session_id).await?;
    Ok(Json(NoticeReply {
        message: "New chat session initialized".to_string(),
    }))
}

/// Handler for GET /sessiondetails/{session_id}
///
/// Never fails: unknown or unusable ids get their own id as the title.
pub async fn session_details(
    Path(raw_id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    match SessionId::parse(raw_id.as_str()) {
        Ok(session_id) => {
            let catalog = Arc::clone(&state.catalog);
            match blocking(move || catalog.get_session_details(&session_id)).await {
                Ok(details) => Json(details).into_response(),
                Err(e) => e.into_response(),
            }
        }
        Err(_) => Json(serde_json::json!({
            "title": raw_id,
            "sessionId": raw_id,
        }))
        .into_response(),
    }
}

/// Handler for GET /sessionhistory
pub async fn session_history(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<Vec<sitegen_core::SessionDetails>>, ApiError> {
    let catalog = Arc::clone(&state.catalog);
    Ok(Json(blocking(move || catalog.list_sessions()).await??))
}

/// Run filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))
}

fn base_url(state: &SharedState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.public_url {
        return url.clone();
    }
    match headers.get(header::HOST).and_then(|host| host.to_str().ok()) {
        Some(host) => format!("http://{}", host),
        None => "http://localhost".to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
