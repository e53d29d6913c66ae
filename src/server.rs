//! HTTP API for the copilot.
//!
//! Lets a web front end (or any HTTP client) ask questions against the index
//! built at startup. The server holds one [`Copilot`] behind an `Arc`; the
//! index is read-only, so handlers share it without locking. Conversation
//! history is owned by the client and sent with each request.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, and index size |
//! | `POST` | `/retrieve` | Top-k snippets for a question, no completion call |
//! | `POST` | `/ask` | Answer a question (JSON, or SSE when `stream` is true) |
//!
//! # Streaming
//!
//! With `"stream": true`, `/ask` responds with `text/event-stream` events:
//!
//! | Event | Data |
//! |-------|------|
//! | `context` | `{ "context": "1. ...", "sources": [...] }` |
//! | `delta` | `{ "text": "..." }`, one per fragment |
//! | `error` | `{ "code": "stream_interrupted", "message": "..." }` |
//! | `done` | `{}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `completion_failed` (502).

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::completion::Completion;
use crate::config::Config;
use crate::copilot::Copilot;
use crate::models::ChatMessage;
use crate::progress::ProgressMode;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    copilot: Arc<Copilot>,
}

/// Builds the index, then serves on `[server].bind` until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let progress = ProgressMode::default_for_tty().reporter();
    let copilot = Copilot::from_config(config, progress.as_ref()).await?;
    let app = router(Arc::new(copilot));

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    println!("Copilot API listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    axum::serve(listener, app).await?;
    Ok(())
}

/// The API routes with permissive CORS, for embedding in other servers or
/// tests.
pub fn router(copilot: Arc<Copilot>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/retrieve", post(handle_retrieve))
        .route("/ask", post(handle_ask))
        .layer(cors)
        .with_state(AppState { copilot })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn completion_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "completion_failed".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    documents: usize,
    chunks: usize,
    embedding_model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let retriever = state.copilot.retriever();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documents: retriever.index().document_count(),
        chunks: retriever.index().len(),
        embedding_model: retriever.embedder().model_name().to_string(),
    })
}

// ============ POST /retrieve ============

#[derive(Deserialize)]
struct RetrieveRequest {
    question: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct RetrieveResult {
    rank: usize,
    score: f32,
    text: String,
    source: String,
}

#[derive(Serialize)]
struct RetrieveResponse {
    results: Vec<RetrieveResult>,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let retriever = state.copilot.retriever();
    let k = req.k.unwrap_or(retriever.top_k());
    if k == 0 {
        return Err(bad_request("k must be >= 1"));
    }

    let results = retriever
        .retrieve(&req.question, k)
        .await
        .map_err(|e| AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "retrieval_failed".to_string(),
            message: e.to_string(),
        })?;

    Ok(Json(RetrieveResponse {
        results: results
            .into_iter()
            .enumerate()
            .map(|(i, r)| RetrieveResult {
                rank: i + 1,
                score: r.score,
                source: r.chunk.source_path.display().to_string(),
                text: r.chunk.text,
            })
            .collect(),
    }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
    /// Defaults to the configured `completion.stream`.
    #[serde(default)]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    context: String,
    sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retrieval_error: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Response, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let stream = req.stream.unwrap_or(state.copilot.streams());
    let answer = state
        .copilot
        .ask_with(&req.question, &req.history, stream)
        .await;

    let context = answer.context.formatted();
    let sources = answer.context.sources();
    let retrieval_error = answer.context.error.clone();

    match answer.completion {
        Completion::Failed(failure) => Err(completion_failed(failure.to_string())),
        Completion::Stream(text_stream) if stream => {
            let head = sse_event(
                "context",
                serde_json::json!({ "context": context, "sources": sources }),
            );
            let deltas = text_stream.map(|item| match item {
                Ok(text) => sse_event("delta", serde_json::json!({ "text": text })),
                Err(e) => sse_event(
                    "error",
                    serde_json::json!({ "code": "stream_interrupted", "message": e.to_string() }),
                ),
            });
            let events = stream::once(async move { head })
                .chain(deltas)
                .chain(stream::once(async {
                    sse_event("done", serde_json::json!({}))
                }))
                .map(Ok::<_, Infallible>);

            Ok(Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response())
        }
        completion => {
            let answer = completion
                .into_text()
                .await
                .map_err(|e| completion_failed(e.to_string()))?;
            Ok(Json(AskResponse {
                answer,
                context,
                sources,
                retrieval_error,
            })
            .into_response())
        }
    }
}

fn sse_event(name: &str, data: serde_json::Value) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|_| Event::default().event(name))
}
