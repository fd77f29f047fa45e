//! HTTP endpoint handlers. These are thin wrappers that forward to the
//! store, directory, engine, or shared logic, plus the error-to-status
//! mapping for the whole API surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::domain::{
    ClassPatch, Lesson, LessonPatch, LessonStatus, Role, SchoolClass, User, UserKind, UserPatch,
};
use crate::error::{DirectoryError, GatewayError, ProgressError, StoreError};
use crate::logic;
use crate::protocol::*;
use crate::state::AppState;
use crate::store::{CollectionKind, FieldFilters};
use crate::users::NewProfile;
use crate::util::class_access_code;

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}

/// Error envelope for every handler: component errors carry their own
/// status; `BadRequest`/`NotFound` cover handler-local checks.
pub enum ApiError {
    Store(StoreError),
    Directory(DirectoryError),
    Progress(ProgressError),
    Gateway(GatewayError),
    BadRequest(String),
    NotFound(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}
impl From<DirectoryError> for ApiError {
    fn from(e: DirectoryError) -> Self {
        ApiError::Directory(e)
    }
}
impl From<ProgressError> for ApiError {
    fn from(e: ProgressError) -> Self {
        ApiError::Progress(e)
    }
}
impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::UnknownCollection(_) | StoreError::InvalidDocumentFormat(_) => {
            StatusCode::BAD_REQUEST
        }
        StoreError::Io(_) | StoreError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Store(e) => (store_status(e), e.to_string()),
            ApiError::Directory(e) => {
                let status = match e {
                    DirectoryError::Validation(_) => StatusCode::BAD_REQUEST,
                    DirectoryError::UserNotFound { .. } => StatusCode::NOT_FOUND,
                    DirectoryError::DuplicateEmail { .. } => StatusCode::CONFLICT,
                    DirectoryError::Store(inner) => store_status(inner),
                };
                (status, e.to_string())
            }
            ApiError::Progress(e) => {
                let status = match e {
                    ProgressError::LessonNotFound(_) | ProgressError::UserNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    ProgressError::NotAStudent(_) => StatusCode::BAD_REQUEST,
                    ProgressError::Store(inner) => store_status(inner),
                };
                (status, e.to_string())
            }
            ApiError::Gateway(e) => {
                let status = match e {
                    GatewayError::ProviderNotConfigured(_) => StatusCode::BAD_REQUEST,
                    GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                    GatewayError::RequestFailed(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };
        if status.is_server_error() {
            error!(target: "edudash_backend", %status, %message, "Request failed");
        }
        (status, Json(ErrorOut { error: message })).into_response()
    }
}

/// Session helper: most write endpoints require a logged-in user of a
/// specific kind.
async fn require_session(
    state: &AppState,
    kind: UserKind,
) -> Result<crate::users::Session, ApiError> {
    let Some(session) = state.directory.current_session().await else {
        return Err(ApiError::BadRequest("login required".into()));
    };
    if session.kind != kind {
        return Err(ApiError::BadRequest(format!("this action requires a {kind} session")));
    }
    Ok(session)
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
    Json(OkOut { ok: true })
}

// --- Auth ---

#[instrument(level = "info", skip(state, body), fields(kind = %body.kind, email = %body.email))]
pub async fn http_post_register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterIn>,
) -> Result<Json<crate::domain::Record<User>>, ApiError> {
    let profile = NewProfile { name: body.name, email: body.email };
    let user = match body.kind {
        UserKind::Teacher => state.directory.register_teacher(profile).await?,
        UserKind::Student => state.directory.register_student(profile).await?,
    };
    Ok(Json(user))
}

#[instrument(level = "info", skip(state, body), fields(kind = %body.kind, email = %body.email))]
pub async fn http_post_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginIn>,
) -> Result<Json<crate::domain::Record<User>>, ApiError> {
    let user = state.directory.login(&body.email, body.kind).await?;
    info!(target: "edudash_backend", id = %user.id, "Login");
    Ok(Json(user))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.directory.end_session().await;
    Json(OkOut { ok: true })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SessionOut { session: state.directory.current_session().await })
}

// --- Lessons ---

#[instrument(level = "info", skip(state))]
pub async fn http_get_lessons(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.list::<Lesson>().await)
}

#[instrument(level = "info", skip(state, body), fields(title = %body.title))]
pub async fn http_post_lesson(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LessonCreateIn>,
) -> Result<Json<crate::domain::Record<Lesson>>, ApiError> {
    let session = require_session(&state, UserKind::Teacher).await?;
    if body.title.trim().is_empty() || body.category.trim().is_empty() {
        return Err(ApiError::BadRequest("title and category are required".into()));
    }

    let lesson = Lesson {
        title: body.title,
        category: body.category,
        exam_target: body.exam_target,
        difficulty: body.difficulty,
        base_points: body.base_points,
        estimated_time_minutes: body.estimated_time_minutes.unwrap_or(15),
        created_by_teacher_id: Some(session.user_id.clone()),
        prerequisites: body.prerequisites,
        status: LessonStatus::Active,
    };
    let record = state.store.create(lesson).await?;

    // Track the lesson on its author's record.
    if let Some(user) = state.store.get::<User>(&session.user_id).await {
        if let Role::Teacher { lessons_created, .. } = &user.fields.role {
            let mut set = lessons_created.clone();
            set.insert(record.id.clone());
            let patch = UserPatch { lessons_created: Some(set), ..Default::default() };
            state.store.update::<User>(&session.user_id, patch).await?;
        }
    }
    Ok(Json(record))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_lesson(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::domain::Record<Lesson>>, ApiError> {
    match state.store.get::<Lesson>(&id).await {
        Some(lesson) => Ok(Json(lesson)),
        None => Err(ApiError::NotFound(format!("lesson not found: {id}"))),
    }
}

#[instrument(level = "info", skip(state, patch), fields(%id))]
pub async fn http_put_lesson(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<LessonPatch>,
) -> Result<Json<crate::domain::Record<Lesson>>, ApiError> {
    require_session(&state, UserKind::Teacher).await?;
    match state.store.update::<Lesson>(&id, patch).await? {
        Some(lesson) => Ok(Json(lesson)),
        None => Err(ApiError::NotFound(format!("lesson not found: {id}"))),
    }
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_delete_lesson(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OkOut>, ApiError> {
    require_session(&state, UserKind::Teacher).await?;
    let removed = state.store.remove::<Lesson>(&id).await?;
    Ok(Json(OkOut { ok: removed }))
}

// --- Classes & assignments ---

#[instrument(level = "info", skip(state))]
pub async fn http_get_classes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.list::<SchoolClass>().await)
}

#[instrument(level = "info", skip(state, body), fields(name = %body.name))]
pub async fn http_post_class(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClassCreateIn>,
) -> Result<Json<crate::domain::Record<SchoolClass>>, ApiError> {
    let session = require_session(&state, UserKind::Teacher).await?;
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("class name is required".into()));
    }

    let class = SchoolClass {
        name: body.name,
        focus: body.focus,
        access_code: class_access_code(),
        teacher_id: session.user_id.clone(),
        student_ids: Default::default(),
        lesson_ids: Default::default(),
        active: true,
    };
    let record = state.store.create(class).await?;

    if let Some(user) = state.store.get::<User>(&session.user_id).await {
        if let Role::Teacher { classes_owned, .. } = &user.fields.role {
            let mut set = classes_owned.clone();
            set.insert(record.id.clone());
            let patch = UserPatch { classes_owned: Some(set), ..Default::default() };
            state.store.update::<User>(&session.user_id, patch).await?;
        }
    }
    Ok(Json(record))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_enroll(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnrollIn>,
) -> Result<Json<crate::domain::Record<SchoolClass>>, ApiError> {
    let session = require_session(&state, UserKind::Student).await?;
    let code = body.access_code.trim().to_uppercase();

    let found = state
        .store
        .find::<SchoolClass, _>(|c| c.fields.access_code == code && c.fields.active)
        .await;
    let Some(class) = found.into_iter().next() else {
        return Err(ApiError::NotFound("no active class with that access code".into()));
    };

    let mut students = class.fields.student_ids.clone();
    students.insert(session.user_id.clone());
    let patch = ClassPatch { student_ids: Some(students), ..Default::default() };
    let updated = state
        .store
        .update::<SchoolClass>(&class.id, patch)
        .await?
        .unwrap_or(class);

    if let Some(user) = state.store.get::<User>(&session.user_id).await {
        if let Role::Student { classes_enrolled, .. } = &user.fields.role {
            let mut set = classes_enrolled.clone();
            set.insert(updated.id.clone());
            let patch = UserPatch { classes_enrolled: Some(set), ..Default::default() };
            state.store.update::<User>(&session.user_id, patch).await?;
        }
    }
    info!(target: "edudash_backend", class = %updated.id, student = %session.user_id, "Student enrolled");
    Ok(Json(updated))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_assignments(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.list::<crate::domain::Assignment>().await)
}

#[instrument(level = "info", skip(state, body), fields(class_id = %body.class_id, lesson_id = %body.lesson_id))]
pub async fn http_post_assignment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AssignmentCreateIn>,
) -> Result<Json<crate::domain::Record<crate::domain::Assignment>>, ApiError> {
    let session = require_session(&state, UserKind::Teacher).await?;
    if state.store.get::<SchoolClass>(&body.class_id).await.is_none() {
        return Err(ApiError::NotFound(format!("class not found: {}", body.class_id)));
    }
    if state.store.get::<Lesson>(&body.lesson_id).await.is_none() {
        return Err(ApiError::NotFound(format!("lesson not found: {}", body.lesson_id)));
    }

    let record = state
        .store
        .create(crate::domain::Assignment {
            class_id: body.class_id,
            lesson_id: body.lesson_id,
            assigned_by_teacher_id: session.user_id,
            due_at: body.due_at,
            note: body.note,
        })
        .await?;
    Ok(Json(record))
}

// --- Progress ---

#[instrument(level = "info", skip(state, body), fields(student = %body.student_id, lesson = %body.lesson_id))]
pub async fn http_post_complete(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CompleteIn>,
) -> Result<Json<crate::progress::CompletionOutcome>, ApiError> {
    let outcome = logic::complete_lesson(
        &state,
        &body.student_id,
        &body.lesson_id,
        body.score_percent,
        body.time_spent_minutes,
    )
    .await?;
    Ok(Json(outcome))
}

#[instrument(level = "info", skip(state), fields(%student_id))]
pub async fn http_get_progress(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<String>,
) -> Result<Json<crate::progress::ProgressSummary>, ApiError> {
    Ok(Json(state.engine.summary(&student_id).await?))
}

// --- Generic collection access ---

#[instrument(level = "info", skip(state), fields(%collection))]
pub async fn http_get_collection(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let kind: CollectionKind = collection.parse()?;
    Ok(Json(state.store.collection_values(kind).await?))
}

#[instrument(level = "info", skip(state, filters), fields(%collection))]
pub async fn http_post_query(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Json(filters): Json<FieldFilters>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let kind: CollectionKind = collection.parse()?;
    Ok(Json(state.store.query_values(kind, &filters).await?))
}

// --- Backup / restore ---

#[instrument(level = "info", skip(state))]
pub async fn http_get_backup(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let doc = state.store.export().await?;
    let filename = format!("edudash_backup_{}.json", Utc::now().format("%Y-%m-%d"));
    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(doc)))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_restore(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<OkOut>, ApiError> {
    state.store.import(body).await?;
    Ok(Json(OkOut { ok: true }))
}

// --- Settings ---

#[instrument(level = "info", skip(state))]
pub async fn http_get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.settings().await)
}

#[instrument(level = "info", skip(state, patch))]
pub async fn http_put_settings(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<SettingsPatchIn>,
) -> Result<Json<crate::domain::Settings>, ApiError> {
    let settings = state
        .store
        .update_settings(|settings| {
            if let Some(providers) = patch.providers {
                for (id, cfg) in providers {
                    settings.providers.insert(id, cfg);
                }
            }
            if let Some(v) = patch.default_provider {
                settings.default_provider = v;
            }
            if let Some(v) = patch.theme {
                settings.theme = v;
            }
            if let Some(v) = patch.language {
                settings.language = v;
            }
        })
        .await?;
    Ok(Json(settings))
}

// --- AI tutor ---

#[instrument(level = "info", skip(state, body), fields(title = %body.title))]
pub async fn http_post_ai_generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateLessonIn>,
) -> Result<Json<AiOut>, ApiError> {
    let text = logic::generate_lesson_content(
        &state,
        &body.title,
        &body.category,
        body.difficulty,
        body.exam_target,
        body.provider,
    )
    .await?;
    Ok(Json(AiOut { text }))
}

#[instrument(level = "info", skip(state, body), fields(topic = %body.topic))]
pub async fn http_post_ai_summary(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AiSummaryIn>,
) -> Result<Json<AiOut>, ApiError> {
    let text = logic::generate_topic_summary(&state, &body.topic, body.level, body.provider).await?;
    Ok(Json(AiOut { text }))
}

#[instrument(level = "info", skip(state, body), fields(question_len = body.question.len()))]
pub async fn http_post_ai_question(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QuestionIn>,
) -> Result<Json<AiOut>, ApiError> {
    let text = logic::answer_question(&state, &body.question, body.provider).await?;
    Ok(Json(AiOut { text }))
}
