//! EduDash · English Exam-Prep Backend (ENEM/UFPR)
//!
//! - Axum HTTP + WebSocket API
//! - Durable JSON document store (local file)
//! - Optional AI tutor integration (providers configured in the store)
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT          : u16 (default 3000)
//!   EDUDASH_DATA_PATH  : path to the JSON data file (default ./edudash_data.json)
//!   EDUDASH_CONFIG_PATH : path to TOML config (tutor prompts + optional lesson bank)
//!   OPENAI_BASE_URL    : override for OpenAI-compatible relays
//!   LOG_LEVEL    : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT      : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod config;
mod store;
mod users;
mod badges;
mod progress;
mod gateway;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (store, directory, engine, gateway).
  let state = Arc::new(AppState::from_env().await?);

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "edudash_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
