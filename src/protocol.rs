//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Difficulty, ExamTarget, ProviderConfig, UserKind};
use crate::progress::{CompletionOutcome, ProgressSummary};
use crate::users::Session;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    CompleteLesson {
        #[serde(rename = "studentId")]
        student_id: String,
        #[serde(rename = "lessonId")]
        lesson_id: String,
        #[serde(rename = "scorePercent")]
        score_percent: f64,
        #[serde(rename = "timeSpentMinutes")]
        time_spent_minutes: u32,
    },
    ProgressSummary {
        #[serde(rename = "studentId")]
        student_id: String,
    },
    AskTutor {
        question: String,
        provider: Option<String>,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Completion {
        outcome: CompletionOutcome,
    },
    ProgressSummary {
        summary: ProgressSummary,
    },
    TutorReply {
        text: String,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct RegisterIn {
    pub kind: UserKind,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginIn {
    pub email: String,
    pub kind: UserKind,
}

#[derive(Serialize)]
pub struct SessionOut {
    pub session: Option<Session>,
}

#[derive(Debug, Deserialize)]
pub struct LessonCreateIn {
    pub title: String,
    pub category: String,
    #[serde(rename = "examTarget")]
    pub exam_target: ExamTarget,
    pub difficulty: Difficulty,
    #[serde(rename = "basePoints")]
    pub base_points: u32,
    #[serde(rename = "estimatedTimeMinutes", default)]
    pub estimated_time_minutes: Option<u32>,
    #[serde(default)]
    pub prerequisites: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClassCreateIn {
    pub name: String,
    pub focus: ExamTarget,
}

#[derive(Debug, Deserialize)]
pub struct EnrollIn {
    #[serde(rename = "accessCode")]
    pub access_code: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentCreateIn {
    #[serde(rename = "classId")]
    pub class_id: String,
    #[serde(rename = "lessonId")]
    pub lesson_id: String,
    #[serde(rename = "dueAt", default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteIn {
    #[serde(rename = "studentId")]
    pub student_id: String,
    #[serde(rename = "lessonId")]
    pub lesson_id: String,
    #[serde(rename = "scorePercent")]
    pub score_percent: f64,
    #[serde(rename = "timeSpentMinutes")]
    pub time_spent_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct GenerateLessonIn {
    pub title: String,
    pub category: String,
    pub difficulty: Difficulty,
    #[serde(rename = "examTarget")]
    pub exam_target: ExamTarget,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AiSummaryIn {
    pub topic: String,
    pub level: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionIn {
    pub question: String,
    pub provider: Option<String>,
}

#[derive(Serialize)]
pub struct AiOut {
    pub text: String,
}

/// Partial settings update. Provider entries are replaced whole, by id.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatchIn {
    pub providers: Option<BTreeMap<String, ProviderConfig>>,
    #[serde(rename = "defaultProvider")]
    pub default_provider: Option<String>,
    pub theme: Option<String>,
    pub language: Option<String>,
}

#[derive(Serialize)]
pub struct OkOut {
    pub ok: bool,
}
