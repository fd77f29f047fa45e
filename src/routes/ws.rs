//! WebSocket upgrade + message loop. Each client message is parsed as JSON
//! and forwarded to core logic. We reply with a single JSON message per
//! request.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::logic;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!(target: "edudash_backend", "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    info!(target: "edudash_backend", "WebSocket connected");
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(txt) => {
                // Parse, dispatch, serialize response.
                let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
                    Ok(incoming) => {
                        debug!(target: "edudash_backend", "WS received: {:?}", &incoming);
                        handle_client_ws(incoming, &state).await
                    }
                    Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
                };

                let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
                    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
                });

                if let Err(e) = socket.send(Message::Text(out)).await {
                    error!(target: "edudash_backend", error = %e, "WS send error");
                    break;
                }
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!(target: "edudash_backend", "WebSocket disconnected");
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
    match msg {
        ClientWsMessage::Ping => ServerWsMessage::Pong,

        ClientWsMessage::CompleteLesson { student_id, lesson_id, score_percent, time_spent_minutes } => {
            match logic::complete_lesson(state, &student_id, &lesson_id, score_percent, time_spent_minutes).await {
                Ok(outcome) => {
                    tracing::info!(target: "progress", student = %student_id, lesson = %lesson_id, "WS completion recorded");
                    ServerWsMessage::Completion { outcome }
                }
                Err(e) => ServerWsMessage::Error { message: e.to_string() },
            }
        }

        ClientWsMessage::ProgressSummary { student_id } => {
            match state.engine.summary(&student_id).await {
                Ok(summary) => ServerWsMessage::ProgressSummary { summary },
                Err(e) => ServerWsMessage::Error { message: e.to_string() },
            }
        }

        ClientWsMessage::AskTutor { question, provider } => {
            match logic::answer_question(state, &question, provider).await {
                Ok(text) => ServerWsMessage::TutorReply { text },
                Err(e) => ServerWsMessage::Error { message: e.to_string() },
            }
        }
    }
}
