//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Recording lesson completions (transport clamps the score here)
//!   - The AI tutor flows (lesson content, topic summaries, Q&A)
//!
//! The tutor flows are the only suspending operations; their failures are
//! recoverable and surface as user-visible messages, never as retries.

use tracing::instrument;

use crate::domain::{Difficulty, ExamTarget, Settings, User, UserKind};
use crate::error::{GatewayError, ProgressError};
use crate::gateway::GenerateOptions;
use crate::progress::CompletionOutcome;
use crate::state::AppState;
use crate::util::fill_template;

/// Record a completion. The engine's contract expects `score_percent` in
/// [0, 100] and does not re-clamp, so the clamp lives here at the boundary.
#[instrument(level = "info", skip(state), fields(%student_id, %lesson_id, score_percent))]
pub async fn complete_lesson(
  state: &AppState,
  student_id: &str,
  lesson_id: &str,
  score_percent: f64,
  time_spent_minutes: u32,
) -> Result<CompletionOutcome, ProgressError> {
  let score = score_percent.clamp(0.0, 100.0);
  state
    .engine
    .record_completion(student_id, lesson_id, score, time_spent_minutes)
    .await
}

/// Settings snapshot plus the provider to use: the explicit request, or the
/// configured default.
async fn pick_provider(state: &AppState, requested: Option<String>) -> (Settings, String) {
  let settings = state.store.settings().await;
  let provider = requested.unwrap_or_else(|| settings.default_provider.clone());
  (settings, provider)
}

/// Draft full lesson content for a teacher. The caller persists the text
/// into a lesson if they keep it; the gateway never touches the store.
#[instrument(level = "info", skip(state, title, category), fields(title_len = title.len()))]
pub async fn generate_lesson_content(
  state: &AppState,
  title: &str,
  category: &str,
  difficulty: Difficulty,
  exam_target: ExamTarget,
  provider: Option<String>,
) -> Result<String, GatewayError> {
  let (settings, provider) = pick_provider(state, provider).await;
  let prompt = fill_template(
    &state.prompts.lesson_content_user_template,
    &[
      ("title", title),
      ("category", category),
      ("difficulty", &difficulty.to_string()),
      ("exam_target", &exam_target.to_string()),
    ],
  );
  let options = GenerateOptions { max_tokens: Some(900), temperature: None };
  state.gateway.generate(&settings, &provider, &prompt, options).await
}

/// Topic summary for the student assistant.
#[instrument(level = "info", skip(state, topic), fields(topic_len = topic.len()))]
pub async fn generate_topic_summary(
  state: &AppState,
  topic: &str,
  level: Option<String>,
  provider: Option<String>,
) -> Result<String, GatewayError> {
  let (settings, provider) = pick_provider(state, provider).await;
  let level = level.unwrap_or_else(|| "Intermediário".into());
  let prompt = fill_template(
    &state.prompts.summary_user_template,
    &[("topic", topic), ("level", &level)],
  );
  state
    .gateway
    .generate(&settings, &provider, &prompt, GenerateOptions::default())
    .await
}

/// Free-form tutor Q&A. When a student session is open, their level and
/// points are folded into the prompt so the answer matches their stage.
#[instrument(level = "info", skip(state, question), fields(question_len = question.len()))]
pub async fn answer_question(
  state: &AppState,
  question: &str,
  provider: Option<String>,
) -> Result<String, GatewayError> {
  let (settings, provider) = pick_provider(state, provider).await;

  let (level, points) = student_context(state).await;
  let prompt = fill_template(
    &state.prompts.question_user_template,
    &[
      ("question", question),
      ("level", &level.to_string()),
      ("points", &points.to_string()),
    ],
  );
  state
    .gateway
    .generate(&settings, &provider, &prompt, GenerateOptions::default())
    .await
}

async fn student_context(state: &AppState) -> (u32, u64) {
  let Some(session) = state.directory.current_session().await else {
    return (1, 0);
  };
  if session.kind != UserKind::Student {
    return (1, 0);
  }
  match state.store.get::<User>(&session.user_id).await {
    Some(user) => user
      .fields
      .progress()
      .map(|p| (p.current_level, p.total_points))
      .unwrap_or((1, 0)),
    None => (1, 0),
  }
}
