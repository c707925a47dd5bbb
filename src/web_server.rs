use std::convert::Infallible;
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Path, Query, Request, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::chat::{ChatOutcome, DataSource, SmartChat, WebChat, WebChatReply};
use crate::completion::CompletionClient;
use crate::config::Settings;
use crate::constants;
use crate::documents::{self, Document};
use crate::error::WebwiseError;
use crate::feedback::{FeedbackLog, FeedbackRecord};
use crate::history::ChatHistory;
use crate::project_generator::{GeneratedProject, ProgressEvent, ProjectGenerator};
use crate::search::SearchClient;
use crate::web_context::PageFetcher;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

// Wire format of messages pushed to WebSocket clients
#[derive(Clone, Debug, Serialize, Deserialize)]
struct BroadcastMessage {
    message_type: String,
    payload: serde_json::Value,
}

/// Everything one user's session accumulates. The server hosts a single session.
#[derive(Debug)]
pub struct Session {
    pub smart_history: ChatHistory,
    pub web_history: ChatHistory,
    pub document: Option<Document>,
    pub last_archive: Option<Vec<u8>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            smart_history: SmartChat::new_history(),
            web_history: WebChat::new_history(),
            document: None,
            last_archive: None,
        }
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    // Progress updates fanned out to every connected WebSocket client
    progress_tx: broadcast::Sender<ProgressEvent>,
    session: Arc<Mutex<Session>>,
    smart_chat: SmartChat,
    web_chat: WebChat,
    generator: ProjectGenerator,
    feedback: Arc<FeedbackLog>,
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let templates = create_minijinja_env().context("Failed to initialize template engine")?;
        let (progress_tx, _) = broadcast::channel::<ProgressEvent>(100);

        let client = CompletionClient::new(settings).context("Completion client is not configured")?;
        let search = match SearchClient::new(settings) {
            Ok(search) => Some(search),
            Err(e) => {
                warn!(error = %e, "Web search disabled");
                None
            }
        };
        let fetcher = PageFetcher::new().context("Failed to build HTTP client")?;
        let generator = ProjectGenerator::new(client.clone(), settings)
            .context("Failed to configure project generator")?
            .with_progress(progress_tx.clone());

        Ok(Self {
            templates: Arc::new(templates),
            progress_tx,
            session: Arc::new(Mutex::new(Session::default())),
            smart_chat: SmartChat::new(client.clone()),
            web_chat: WebChat::new(client, search, fetcher),
            generator,
            feedback: Arc::new(FeedbackLog::new(settings.feedback_file.clone())),
        })
    }
}

/// JSON error body with a status that reflects the failure kind.
pub struct ApiError(WebwiseError);

impl From<WebwiseError> for ApiError {
    fn from(err: WebwiseError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WebwiseError::InvalidInput(_)
            | WebwiseError::UnsupportedFormat(_)
            | WebwiseError::Extraction { .. } => StatusCode::BAD_REQUEST,
            WebwiseError::Api { .. } | WebwiseError::Http(_) => StatusCode::BAD_GATEWAY,
            WebwiseError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// Minijinja Environment setup
fn create_minijinja_env() -> anyhow::Result<AutoReloader> {
    // Use AutoReloader for development convenience
    let reloader = AutoReloader::new(|notifier| {
        let loader = path_loader("templates");
        let mut env = Environment::new();
        env.set_loader(loader);
        notifier.watch_path("templates", true);
        Ok(env)
    });
    Ok(reloader)
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let env = state.templates.acquire_env().map_err(WebwiseError::from)?;
    let rendered = env
        .get_template("index.html")
        .and_then(|tmpl| {
            tmpl.render(minijinja::context! {
                title => "Webwise",
                smart_greeting => constants::SMART_CHAT_GREETING,
                web_greeting => constants::WEB_CHAT_GREETING,
            })
        })
        .map_err(WebwiseError::from)?;
    Ok(Html(rendered))
}

async fn history_handler(
    State(state): State<AppState>,
    Path(mode): Path<String>,
) -> ApiResult<Json<ChatHistory>> {
    let session = state.session.lock().await;
    let history = match mode.as_str() {
        "smart" => session.smart_history.clone(),
        "web" => session.web_history.clone(),
        other => {
            return Err(WebwiseError::InvalidInput(format!("unknown chat mode '{}'", other)).into())
        }
    };
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatOutcome>> {
    let (mut history, document) = {
        let session = state.session.lock().await;
        (session.smart_history.clone(), session.document.clone())
    };
    let seen = history.len();
    let outcome = state
        .smart_chat
        .respond(&mut history, &request.message, document.as_ref())
        .await;

    let mut session = state.session.lock().await;
    session.smart_history.extend_from(&history, seen);
    Ok(Json(outcome?))
}

#[derive(Debug, Deserialize)]
struct WebChatRequest {
    message: String,
    #[serde(default)]
    source: DataSource,
}

// The session lock is released while the answer is gathered
async fn web_chat_handler(
    State(state): State<AppState>,
    Json(request): Json<WebChatRequest>,
) -> ApiResult<Json<WebChatReply>> {
    let mut history = state.session.lock().await.web_history.clone();
    let seen = history.len();
    let reply = state
        .web_chat
        .respond(&mut history, &request.message, request.source)
        .await?;

    state.session.lock().await.web_history.extend_from(&history, seen);
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    name: String,
}

async fn upload_document_handler(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    info!(name = %params.name, size = body.len(), "Document uploaded");
    let name = params.name.clone();
    // PDF and spreadsheet parsing is CPU-bound
    let document = tokio::task::spawn_blocking(move || documents::extract_text(&name, &body))
        .await
        .map_err(|e| WebwiseError::Io(std::io::Error::other(e)))??;

    let summary = json!({
        "name": document.name,
        "kind": document.kind,
        "chars": document.text.chars().count(),
        "message": format!("Successfully processed {}", document.name),
    });
    state.session.lock().await.document = Some(document);
    Ok(Json(summary))
}

async fn clear_document_handler(State(state): State<AppState>) -> StatusCode {
    state.session.lock().await.document = None;
    StatusCode::NO_CONTENT
}

async fn feedback_handler(
    State(state): State<AppState>,
    Json(record): Json<FeedbackRecord>,
) -> ApiResult<Json<serde_json::Value>> {
    state.feedback.append(&record).await?;
    Ok(Json(json!({ "message": "Thank you for your feedback!" })))
}

#[derive(Debug, Deserialize)]
struct ProjectRequest {
    idea: String,
    #[serde(default)]
    run: bool,
}

async fn project_handler(
    State(state): State<AppState>,
    Json(request): Json<ProjectRequest>,
) -> ApiResult<Json<GeneratedProject>> {
    let project = state.generator.generate(&request.idea, request.run).await?;
    state.session.lock().await.last_archive = Some(project.archive.clone());
    Ok(Json(project))
}

async fn archive_handler(State(state): State<AppState>) -> Response {
    match state.session.lock().await.last_archive.clone() {
        Some(bytes) => (
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", constants::ARCHIVE_FILE_NAME),
                ),
            ],
            bytes,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no project has been generated yet" })),
        )
            .into_response(),
    }
}

// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Forwards progress events to one WebSocket client until it goes away
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut progress_rx = state.progress_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let welcome_msg = BroadcastMessage {
        message_type: "Info".to_string(),
        payload: json!({ "message": "Connected to Webwise" }),
    };
    if let Ok(json_msg) = serde_json::to_string(&welcome_msg) {
        if sender.send(Message::Text(json_msg)).await.is_err() {
            warn!("Failed to send welcome message to new WebSocket client");
            return;
        }
    }

    loop {
        tokio::select! {
            event = progress_rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagging behind progress updates");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let msg = BroadcastMessage {
                    message_type: "Progress".to_string(),
                    payload: json!(event),
                };
                match serde_json::to_string(&msg) {
                    Ok(json_msg) => {
                        if sender.send(Message::Text(json_msg)).await.is_err() {
                            warn!("WebSocket client disconnected or send error. Closing connection.");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize progress message: {}", e),
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Clients talk to the JSON API; the socket is push-only
                        info!("Ignoring text message from WebSocket client: {}", text);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    info!("WebSocket connection closed");
}

/// The full application router. Exposed for handler tests.
pub fn build_router(state: AppState) -> Router {
    let static_files_service = ServeDir::new("static").not_found_service(tower::service_fn(
        |_req: Request| async {
            Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        },
    ));

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/history/:mode", get(history_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/web-chat", post(web_chat_handler))
        .route(
            "/api/document",
            post(upload_document_handler).delete(clear_document_handler),
        )
        .route("/api/feedback", post(feedback_handler))
        .route("/api/project", post(project_handler))
        .route("/api/project/archive", get(archive_handler))
        .nest_service("/static", static_files_service)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(port: u16, settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
