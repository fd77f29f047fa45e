//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS,
//! and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers) – adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/auth/register", post(http::http_post_register))
        .route("/api/v1/auth/login", post(http::http_post_login))
        .route("/api/v1/auth/logout", post(http::http_post_logout))
        .route("/api/v1/auth/session", get(http::http_get_session))
        .route("/api/v1/lessons", get(http::http_get_lessons).post(http::http_post_lesson))
        .route(
            "/api/v1/lessons/:id",
            get(http::http_get_lesson)
                .put(http::http_put_lesson)
                .delete(http::http_delete_lesson),
        )
        .route("/api/v1/classes", get(http::http_get_classes).post(http::http_post_class))
        .route("/api/v1/classes/enroll", post(http::http_post_enroll))
        .route(
            "/api/v1/assignments",
            get(http::http_get_assignments).post(http::http_post_assignment),
        )
        .route("/api/v1/progress/complete", post(http::http_post_complete))
        .route("/api/v1/progress/:student_id", get(http::http_get_progress))
        .route("/api/v1/data/:collection", get(http::http_get_collection))
        .route("/api/v1/data/:collection/query", post(http::http_post_query))
        .route("/api/v1/backup", get(http::http_get_backup))
        .route("/api/v1/restore", post(http::http_post_restore))
        .route("/api/v1/settings", get(http::http_get_settings).put(http::http_put_settings))
        .route("/api/v1/ai/generate", post(http::http_post_ai_generate))
        .route("/api/v1/ai/summary", post(http::http_post_ai_summary))
        .route("/api/v1/ai/question", post(http::http_post_ai_question))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
