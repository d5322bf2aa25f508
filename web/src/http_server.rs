use crate::session::{SessionStoreError, SessionStoreRef};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use fixmycar_core::{ChatError, ChatSession, Generator, Progress, Retriever, SessionOptions, Turn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Application state shared with all routes
#[derive(Clone)]
pub struct AppState {
    generator: Arc<dyn Generator>,
    retriever: Option<Arc<dyn Retriever>>,
    options: SessionOptions,
    store: SessionStoreRef,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Option<Arc<dyn Retriever>>,
        options: SessionOptions,
        store: SessionStoreRef,
    ) -> Self {
        Self {
            generator,
            retriever,
            options,
            store,
        }
    }

    fn new_chat(&self) -> ChatSession {
        ChatSession::new(
            self.generator.clone(),
            self.retriever.clone(),
            self.options,
        )
    }
}

/// Request model for questions
#[derive(Deserialize)]
pub struct MessageRequest {
    message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionCreated {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub show_sources: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct DeltaPayload<'a> {
    delta: &'a str,
    text: &'a str,
}

/// Error type for HTTP server
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Expired(String),
    BadRequest(String),
    Busy,
    InternalError(anyhow::Error),
}

impl From<SessionStoreError> for ApiError {
    fn from(e: SessionStoreError) -> Self {
        match e {
            SessionStoreError::NotFound(id) => ApiError::NotFound(id),
            SessionStoreError::Expired(id) => ApiError::Expired(id),
            other => ApiError::InternalError(anyhow::anyhow!(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(id) => (StatusCode::NOT_FOUND, format!("Unknown session: {}", id)),
            Self::Expired(id) => (
                StatusCode::NOT_FOUND,
                format!("Session {} expired after being idle; start a new one", id),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Busy => (
                StatusCode::CONFLICT,
                "A question is still being answered in this session".to_string(),
            ),
            Self::InternalError(e) => {
                error!(error = %e, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {}", e),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Build the router
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", axum::routing::delete(delete_session))
        .route("/api/sessions/{id}/history", get(history))
        .route("/api/sessions/{id}/messages", post(post_message))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn run_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    axum::serve(listener, create_app(state))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start HTTP server: {}", e))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check handler
async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let sessions = state.store.list_sessions().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: sessions.len(),
    }))
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionCreated>), ApiError> {
    let session = state.store.create_session(state.new_chat()).await?;
    info!(session_id = %session.id, "Session started");

    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: session.id,
            created_at: session.created_at,
            show_sources: state.options.fetch_sources,
        }),
    ))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_session(&id).await?;
    info!(session_id = %id, "Session ended");
    Ok(StatusCode::NO_CONTENT)
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session = state.store.get_session(&id).await?;
    // Never wait on the chat lock: a running answer holds it
    let turns = session.history.borrow().clone();

    Ok(Json(HistoryResponse {
        session_id: session.id,
        turns,
    }))
}

/// Answers a question as a stream of `delta` events closed by a `turn` or
/// `error` event.
async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<MessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }

    let session = state.store.get_session(&id).await?;
    let mut chat = session
        .chat
        .clone()
        .try_lock_owned()
        .map_err(|_| ApiError::Busy)?;

    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    // The submission runs to completion even if the browser goes away
    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let result = chat
            .submit(&payload.message, |progress: Progress<'_>| {
                let _ = progress_tx.send(json_event(
                    "delta",
                    &DeltaPayload {
                        delta: progress.delta,
                        text: progress.text,
                    },
                ));
            })
            .await;

        let event = match result {
            Ok(turn) => {
                debug!(session_id = %session.id, "Answer streamed");
                json_event("turn", &turn)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Question left unanswered");
                json_event("error", &ErrorBody { error: describe(&e) })
            }
        };
        let _ = tx.send(event);
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "Failed to encode event");
            Event::default()
                .event("error")
                .data(r#"{"error":"Failed to encode event"}"#)
        }
    }
}

fn describe(e: &ChatError) -> String {
    match e {
        ChatError::HttpError { status_code, .. } if *status_code == 429 => {
            "The model is busy right now (quota exceeded). Please ask again shortly.".to_string()
        }
        ChatError::InvalidInput(msg) => msg.clone(),
        other => format!("Could not get an answer: {}", other),
    }
}
