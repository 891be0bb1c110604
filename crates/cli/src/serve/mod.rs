//! HTTP servers: the query handler endpoint and the browser chat UI.
//!
//! # Module Structure
//!
//! - `api` - query handler routes (`POST /query`)
//! - `handlers` - chat UI route handlers
//! - `sessions` - cookie-keyed browser sessions
//! - `templates` - server-rendered HTML

mod api;
mod handlers;
mod sessions;
mod templates;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use kbchat_chat::{
    ChatHistory, ChatService, FeedbackCollector, FeedbackStore, HistoryStore, Login, QueryApi,
};
use kbchat_core::AppResult;
use kbchat_knowledge::QueryHandler;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use sessions::SessionStore;

// =============================================================================
// Application State
// =============================================================================

/// Shared state of the chat UI server.
pub struct UiState {
    pub service: ChatService,
    pub feedback: FeedbackCollector,
    pub login: Login,
    pub sessions: SessionStore,
    pub page_title: String,

    /// Lifetime of the signed document links the handler returns
    pub link_expiry_secs: u64,
}

/// What the UI server is built from.
pub struct UiOptions {
    pub api: Arc<dyn QueryApi>,
    pub history: Arc<dyn HistoryStore>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub login: Login,
    pub page_title: String,
    pub session_idle: Duration,
    pub link_expiry_secs: u64,
}

impl UiState {
    pub fn new(options: UiOptions) -> Self {
        Self {
            service: ChatService::new(ChatHistory::new(options.history), options.api),
            feedback: FeedbackCollector::new(options.feedback),
            login: options.login,
            sessions: SessionStore::new(options.session_idle),
            page_title: options.page_title,
            link_expiry_secs: options.link_expiry_secs,
        }
    }
}

// =============================================================================
// Routers
// =============================================================================

/// Router of the query handler endpoint.
pub fn handler_router(handler: Arc<QueryHandler>) -> Router {
    Router::new()
        .route("/query", post(api::query))
        .route("/health", get(api::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Router of the chat UI.
pub fn ui_router(state: Arc<UiState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/login", get(handlers::login_page).post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/chat", post(handlers::chat))
        .route("/new", post(handlers::new_chat))
        .route("/conversations/{id}/load", post(handlers::load_conversation))
        .route("/conversations/{id}/delete", post(handlers::delete_conversation))
        .route(
            "/messages/{idx}/references/{ref_idx}",
            post(handlers::select_reference),
        )
        .route("/messages/{idx}/vote/{direction}", post(handlers::vote))
        .route("/messages/{idx}/feedback", post(handlers::submit_feedback))
        .route("/messages/{idx}/feedback/cancel", post(handlers::cancel_feedback))
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Server Entry Points
// =============================================================================

/// Serve the query handler until Ctrl+C.
pub async fn start_handler_server(bind: &str, handler: Arc<QueryHandler>) -> AppResult<()> {
    let addr = parse_bind(bind)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Query handler listening on http://{}/query", addr);
    axum::serve(listener, handler_router(handler))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Query handler stopped");
    Ok(())
}

/// Serve the chat UI until Ctrl+C.
pub async fn start_ui_server(bind: &str, options: UiOptions) -> AppResult<()> {
    let addr = parse_bind(bind)?;
    let state = Arc::new(UiState::new(options));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("Chat UI: http://{}", addr);
    println!("Press Ctrl+C to stop\n");
    tracing::info!("Chat UI listening on {}", addr);

    axum::serve(listener, ui_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat UI stopped");
    Ok(())
}

fn parse_bind(bind: &str) -> AppResult<SocketAddr> {
    let addr = bind
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;
    Ok(addr)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down...");
}
