use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{OriginalUri, Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    assistant::{Assistant, ChatMessage, ChatProvider},
    email::{EmailScanner, HeaderAnalysisRequest},
    error::{AssistantError, EmailError, SettingsError, StartError},
    report::FileScanReport,
    session::ScanSession,
    settings::{SettingKey, SettingsStore},
    types::{FileInput, ScanInput, ScanKind, SessionSnapshot},
};

/// Shared handles for every route. One session per scan kind.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<HashMap<ScanKind, ScanSession>>,
    settings: Arc<dyn SettingsStore>,
    assistant: Arc<Mutex<Assistant>>,
    email: EmailScanner,
}

impl AppState {
    pub fn new(settings: Arc<dyn SettingsStore>, provider: Arc<dyn ChatProvider>) -> Self {
        let sessions = ScanKind::ALL
            .into_iter()
            .map(|k| (k, ScanSession::new(k)))
            .collect();
        Self {
            sessions: Arc::new(sessions),
            assistant: Arc::new(Mutex::new(Assistant::new(provider, settings.clone()))),
            email: EmailScanner::new(settings.clone()),
            settings,
        }
    }

    pub fn with_assistant(mut self, assistant: Assistant) -> Self {
        self.assistant = Arc::new(Mutex::new(assistant));
        self
    }

    pub fn with_email(mut self, email: EmailScanner) -> Self {
        self.email = email;
        self
    }

    pub fn session(&self, kind: ScanKind) -> Option<&ScanSession> {
        self.sessions.get(&kind)
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

/// JSON error notice: `{"error": {"message", "status"}}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<StartError> for AppError {
    fn from(err: StartError) -> Self {
        let status = match err {
            StartError::InvalidInput(..) => StatusCode::BAD_REQUEST,
            StartError::AlreadyRunning(_) => StatusCode::CONFLICT,
            StartError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        };
        Self::new(status, err.to_string())
    }
}

impl From<AssistantError> for AppError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::EmptyMessage => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            AssistantError::MissingCredential => {
                Self::new(StatusCode::PRECONDITION_REQUIRED, err.to_string())
            }
            // Provider details stay in the log.
            AssistantError::ProviderCallFailed { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                "chat error: check your key or use a server proxy",
            ),
        }
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        let status = match err {
            EmailError::NoAttachment => StatusCode::BAD_REQUEST,
            EmailError::MissingCredential(_) | EmailError::LiveAnalysisUnavailable => {
                StatusCode::PRECONDITION_REQUIRED
            }
            EmailError::AlreadyRunning => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        warn!(error = %err, "settings save failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub input: ScanInput,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsView {
    pub ai_api_key_set: bool,
    pub ai_model: String,
    pub virustotal_api_key_set: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub ai_api_key: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub virustotal_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub reply: String,
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttachmentRequest {
    #[serde(default)]
    pub attachment: Option<FileInput>,
}

/// API routes under `/api`, without the static UI.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/scans", get(list_scans))
        .route("/scans/{kind}", get(get_status).post(post_scan))
        .route("/scans/{kind}/result", get(get_result))
        .route("/scans/{kind}/reset", post(post_reset))
        .route("/scans/{kind}/cancel", post(post_cancel))
        .route("/reports/file", get(get_file_report))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/assistant", post(post_assistant))
        .route("/email/attachment", post(post_attachment))
        .route("/email/headers", post(post_headers))
        .fallback(api_not_found)
        .with_state(state)
}

/// Full application: API plus the UI directory with an `index.html` catch-all.
///
/// Unknown `/api/...` paths get a JSON 404 from the API router, never the page.
pub fn app(state: AppState, ui_dir: &Path) -> Router {
    let index = ServeFile::new(ui_dir.join("index.html"));
    let static_svc = ServeDir::new(ui_dir)
        .append_index_html_on_directories(true)
        .fallback(index);

    Router::new()
        .nest("/api", api_router(state))
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, ui_dir: &Path, state: AppState) -> Result<()> {
    let app = app(state, ui_dir);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, ui = %ui_dir.display(), "serving UI");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn api_not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::not_found(format!("no API route {}", uri.path()))
}

fn session_for(app: &AppState, kind: &str) -> AppResult<(ScanKind, ScanSession)> {
    let kind: ScanKind = kind.parse().map_err(AppError::not_found)?;
    let session = app
        .session(kind)
        .cloned()
        .ok_or_else(|| AppError::not_found(format!("no session for {kind}")))?;
    Ok((kind, session))
}

async fn list_scans(State(app): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    let mut out = Vec::with_capacity(app.sessions.len());
    for kind in ScanKind::ALL {
        if let Some(s) = app.session(kind) {
            out.push(s.snapshot().await);
        }
    }
    Json(out)
}

async fn get_status(
    State(app): State<AppState>,
    UrlPath(kind): UrlPath<String>,
) -> AppResult<Json<SessionSnapshot>> {
    let (_, session) = session_for(&app, &kind)?;
    Ok(Json(session.snapshot().await))
}

async fn post_scan(
    State(app): State<AppState>,
    UrlPath(kind): UrlPath<String>,
    Json(req): Json<ScanRequest>,
) -> AppResult<impl IntoResponse> {
    let (_, session) = session_for(&app, &kind)?;
    let snap = session.start(req.input).await?;
    Ok((StatusCode::ACCEPTED, Json(snap)))
}

async fn get_result(
    State(app): State<AppState>,
    UrlPath(kind): UrlPath<String>,
) -> AppResult<Response> {
    let (_, session) = session_for(&app, &kind)?;
    let snap = session.snapshot().await;
    Ok(match snap.result {
        Some(result) => (StatusCode::OK, Json(result)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn post_reset(
    State(app): State<AppState>,
    UrlPath(kind): UrlPath<String>,
) -> AppResult<Json<SessionSnapshot>> {
    let (_, session) = session_for(&app, &kind)?;
    Ok(Json(session.reset().await))
}

async fn post_cancel(
    State(app): State<AppState>,
    UrlPath(kind): UrlPath<String>,
) -> AppResult<Json<SessionSnapshot>> {
    let (kind, session) = session_for(&app, &kind)?;
    if !session.cancel().await {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            format!("{kind} scan is not running"),
        ));
    }
    Ok(Json(session.snapshot().await))
}

async fn get_file_report(State(app): State<AppState>) -> AppResult<Response> {
    let (_, session) = session_for(&app, ScanKind::File.slug())?;
    let report = FileScanReport::from_snapshot(&session.snapshot().await)
        .ok_or_else(|| AppError::not_found("no completed file scan"))?;
    let disposition = format!("attachment; filename=\"{}\"", report.download_name());
    Ok((
        [(header::CONTENT_DISPOSITION, disposition)],
        Json(report),
    )
        .into_response())
}

fn settings_view(store: &dyn SettingsStore) -> SettingsView {
    SettingsView {
        ai_api_key_set: store.get(SettingKey::AiApiKey).is_some(),
        ai_model: store.model(),
        virustotal_api_key_set: store.get(SettingKey::VirustotalApiKey).is_some(),
    }
}

async fn get_settings(State(app): State<AppState>) -> Json<SettingsView> {
    Json(settings_view(app.settings.as_ref()))
}

async fn put_settings(
    State(app): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<SettingsView>> {
    let pairs = [
        (SettingKey::AiApiKey, update.ai_api_key),
        (SettingKey::AiModel, update.ai_model),
        (SettingKey::VirustotalApiKey, update.virustotal_api_key),
    ];
    for (key, value) in pairs {
        if let Some(value) = value {
            app.settings.set(key, &value)?;
            info!(%key, "setting updated");
        }
    }
    Ok(Json(settings_view(app.settings.as_ref())))
}

// One conversation, so turns are serialized; `Assistant` bounds each call.
async fn post_assistant(
    State(app): State<AppState>,
    Json(req): Json<AskRequest>,
) -> AppResult<Json<AskResponse>> {
    let mut assistant = app.assistant.lock().await;
    let reply = assistant.ask(&req.message).await?;
    Ok(Json(AskResponse {
        reply,
        history: assistant.history().to_vec(),
    }))
}

async fn post_attachment(
    State(app): State<AppState>,
    Json(req): Json<AttachmentRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = app.email.scan_attachment(req.attachment).await?;
    Ok(Json(outcome))
}

async fn post_headers(
    State(app): State<AppState>,
    Json(req): Json<HeaderAnalysisRequest>,
) -> AppResult<StatusCode> {
    app.email.analyze_headers(&req)?;
    Ok(StatusCode::OK)
}
