use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::Path as FsPath,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
};
use tokio::sync::Mutex;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::gemini::{GeminiClient, HistoryEntry};
use crate::orchestrator::{ChatError, ChatOrchestrator, DEFAULT_LANGUAGE};
use crate::prompt::{InstructionsData, PromptAssembler};
use crate::search::{SearchClient, SearchResultItem};
use crate::store::{ConversationStore, FileKvStore, KvStore, Workspace};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    // All chat turns and workspace mutations serialize through this lock.
    orchestrator: Arc<Mutex<ChatOrchestrator>>,
    // The orchestrator's in-flight marker; lets the chat handler reject an
    // overlapping submission instead of queueing it on the lock.
    turn_in_flight: Arc<AtomicBool>,
    search: SearchClient,
    gemini: GeminiClient,
    instructions: Arc<InstructionsData>,
}

// Minijinja Environment setup
fn create_minijinja_env() -> Result<AutoReloader> {
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

/// Wires clients, prompt data, and the file-backed store into the shared
/// application state.
pub fn build_app_state(config: &Config) -> Result<AppState> {
    let kv = FileKvStore::new(&config.storage_dir);
    build_app_state_with_store(config, Box::new(kv))
}

pub fn build_app_state_with_store(config: &Config, kv: Box<dyn KvStore>) -> Result<AppState> {
    let templates = create_minijinja_env().context("Failed to initialize template engine")?;
    let instructions = InstructionsData::load(FsPath::new(&config.data_path));
    let search = SearchClient::new(config);
    let gemini = GeminiClient::new(config);
    let orchestrator = ChatOrchestrator::new(
        search.clone(),
        gemini.clone(),
        PromptAssembler::new(instructions.clone()),
        ConversationStore::new(kv),
    );

    let turn_in_flight = orchestrator.in_flight_flag();
    Ok(AppState {
        templates: Arc::new(templates),
        orchestrator: Arc::new(Mutex::new(orchestrator)),
        turn_in_flight,
        search,
        gemini,
        instructions: Arc::new(instructions),
    })
}

async fn index_handler(
    State(state): State<AppState>,
) -> Result<axum::response::Html<String>, axum::response::Html<String>> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => "Scout",
                };
                tmpl.render(context)
            })
        })
        .map(axum::response::Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            axum::response::Html(format!("Internal Server Error: {}", e))
        })
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    /// Short display title for canned prompts: it is what history records
    /// while the full `message` goes to the model.
    #[serde(default)]
    prompt_title: Option<String>,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn error_body(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message.into() }))
}

// Entry point into the orchestrator: one user submission, one reply.
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    // The in-flight marker reads true for the whole duration of a turn;
    // reject an overlapping submission instead of queueing it on the lock.
    // A submission that slips past the check still gets serialized by the
    // lock and re-checked by the orchestrator's own guard.
    if state.turn_in_flight.load(Ordering::SeqCst) {
        return (
            StatusCode::CONFLICT,
            error_body(ChatError::Busy.to_string()),
        );
    }
    let mut orchestrator = state.orchestrator.lock().await;
    match orchestrator
        .handle_prompt(
            &request.message,
            request.prompt_title.as_deref(),
            &request.language,
        )
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "text": outcome.text,
                "workspace_id": outcome.workspace_id,
            })),
        ),
        Err(e) => {
            let status = match e {
                ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
                ChatError::Busy => StatusCode::CONFLICT,
                ChatError::Llm(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, error_body(e.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct GeminiRequest {
    #[serde(default)]
    history: Vec<HistoryEntry>,
    message: String,
    #[serde(default)]
    context: String,
}

// Direct pass-through to the LLM, bypassing search and persistence.
async fn gemini_handler(
    State(state): State<AppState>,
    Json(request): Json<GeminiRequest>,
) -> impl IntoResponse {
    match state
        .gemini
        .send_message(&request.history, &request.message, &request.context)
        .await
    {
        Ok(text) => (StatusCode::OK, Json(serde_json::json!({ "text": text }))),
        Err(e) => {
            error!(error = ?e, "error in /api/gemini");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("An error occurred while processing your request"),
            )
        }
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Json<Vec<SearchResultItem>> {
    Json(state.search.search(&request.query).await)
}

async fn data_handler(State(state): State<AppState>) -> Json<InstructionsData> {
    Json(state.instructions.as_ref().clone())
}

#[derive(Serialize)]
struct WorkspacesResponse {
    workspaces: Vec<Workspace>,
    current_id: Option<i64>,
}

async fn list_workspaces_handler(State(state): State<AppState>) -> Json<WorkspacesResponse> {
    let orchestrator = state.orchestrator.lock().await;
    Json(WorkspacesResponse {
        workspaces: orchestrator.store().workspaces().to_vec(),
        current_id: orchestrator.store().current_id(),
    })
}

// "New chat": an empty workspace whose name is finalized by its first turn.
async fn create_workspace_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut orchestrator = state.orchestrator.lock().await;
    let id = orchestrator.store_mut().create_workspace(None);
    let workspace = orchestrator.store().workspace(id).cloned();
    (StatusCode::CREATED, Json(workspace))
}

async fn select_workspace_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> StatusCode {
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.store_mut().select_workspace(id);
    StatusCode::NO_CONTENT
}

async fn delete_workspace_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> StatusCode {
    let mut orchestrator = state.orchestrator.lock().await;
    orchestrator.store_mut().delete_workspace(id);
    StatusCode::NO_CONTENT
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/gemini", post(gemini_handler))
        .route("/api/search", post(search_handler))
        .route("/api/data", get(data_handler))
        .route(
            "/api/workspaces",
            get(list_workspaces_handler).post(create_workspace_handler),
        )
        .route("/api/workspaces/:id", delete(delete_workspace_handler))
        .route("/api/workspaces/:id/select", post(select_workspace_handler))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(port: u16, state: AppState) -> Result<()> {
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
