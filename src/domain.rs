//! Domain models persisted by the store: users (teacher/student variants),
//! classes, lessons, assignments, progress events, and provider settings.
//!
//! Every persisted entity is wrapped in a [`Record`], which carries the
//! store-assigned id and timestamps. Partial updates go through the typed
//! `*Patch` structs so a caller cannot smuggle unknown fields into a record.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope for every persisted entity: store-assigned id plus timestamps.
/// Payload fields are flattened so the JSON document stays a flat object
/// per entry, the shape the dashboard frontend reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record<T> {
  pub id: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(flatten)]
  pub fields: T,
}

/// Role discriminant, also used for login resolution and session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
  Teacher,
  Student,
}

impl fmt::Display for UserKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      UserKind::Teacher => f.write_str("teacher"),
      UserKind::Student => f.write_str("student"),
    }
  }
}

/// A user record. Shared fields live on the struct; role-specific fields are
/// a tagged union flattened into the same JSON object under `kind`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
  pub name: String,
  pub email: String,
  #[serde(default)]
  pub last_login_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub role: Role,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
  Teacher {
    #[serde(default)]
    classes_owned: BTreeSet<String>,
    #[serde(default)]
    lessons_created: BTreeSet<String>,
  },
  Student {
    #[serde(default)]
    classes_enrolled: BTreeSet<String>,
    progress: ProgressState,
    stats: StudentStats,
  },
}

impl User {
  pub fn kind(&self) -> UserKind {
    match self.role {
      Role::Teacher { .. } => UserKind::Teacher,
      Role::Student { .. } => UserKind::Student,
    }
  }

  /// Progress state, if this user is a student.
  pub fn progress(&self) -> Option<&ProgressState> {
    match &self.role {
      Role::Student { progress, .. } => Some(progress),
      Role::Teacher { .. } => None,
    }
  }

  pub fn stats(&self) -> Option<&StudentStats> {
    match &self.role {
      Role::Student { stats, .. } => Some(stats),
      Role::Teacher { .. } => None,
    }
  }
}

/// Derived, recomputed gamification summary embedded in a student record.
/// `current_level` is only ever written by the level formula; badge ids grow
/// monotonically and are never removed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressState {
  pub total_points: u64,
  pub current_level: u32,
  pub streak_days: u32,
  #[serde(default)]
  pub last_activity_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub unlocked_badge_ids: BTreeSet<String>,
}

impl Default for ProgressState {
  fn default() -> Self {
    Self {
      total_points: 0,
      current_level: 1,
      streak_days: 0,
      last_activity_at: None,
      unlocked_badge_ids: BTreeSet::new(),
    }
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StudentStats {
  pub lessons_completed: u32,
  pub average_score: f64,
  pub time_spent_minutes: u32,
}

/// Which entrance exam a lesson or class targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamTarget {
  Enem,
  Ufpr,
  Both,
  General,
}

impl fmt::Display for ExamTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExamTarget::Enem => f.write_str("enem"),
      ExamTarget::Ufpr => f.write_str("ufpr"),
      ExamTarget::Both => f.write_str("both"),
      ExamTarget::General => f.write_str("general"),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  /// Points multiplier applied on lesson completion.
  pub fn multiplier(self) -> f64 {
    match self {
      Difficulty::Easy => 1.0,
      Difficulty::Medium => 1.2,
      Difficulty::Hard => 1.5,
    }
  }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Difficulty::Easy => f.write_str("easy"),
      Difficulty::Medium => f.write_str("medium"),
      Difficulty::Hard => f.write_str("hard"),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
  Active,
  Archived,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lesson {
  pub title: String,
  pub category: String,
  pub exam_target: ExamTarget,
  pub difficulty: Difficulty,
  pub base_points: u32,
  pub estimated_time_minutes: u32,
  /// None for lessons seeded from the config bank (no authoring teacher).
  #[serde(default)]
  pub created_by_teacher_id: Option<String>,
  #[serde(default)]
  pub prerequisites: BTreeSet<String>,
  pub status: LessonStatus,
}

/// A class (turma) owned by one teacher. Students join with the access code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchoolClass {
  pub name: String,
  pub focus: ExamTarget,
  pub access_code: String,
  pub teacher_id: String,
  #[serde(default)]
  pub student_ids: BTreeSet<String>,
  #[serde(default)]
  pub lesson_ids: BTreeSet<String>,
  pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
  pub class_id: String,
  pub lesson_id: String,
  pub assigned_by_teacher_id: String,
  #[serde(default)]
  pub due_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub note: String,
}

/// One lesson-completion attempt. Append-only: created by the progress
/// engine, never updated or deleted. Repeat attempts at the same lesson each
/// produce their own event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
  pub student_id: String,
  pub lesson_id: String,
  pub score_percent: f64,
  pub time_spent_minutes: u32,
  pub points_earned: u64,
  pub completed_at: DateTime<Utc>,
}

// --- Settings ---

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
  #[serde(default)]
  pub api_key: String,
  pub model: String,
  #[serde(default)]
  pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
  pub providers: BTreeMap<String, ProviderConfig>,
  pub default_provider: String,
  pub theme: String,
  pub language: String,
}

impl Default for Settings {
  fn default() -> Self {
    let mut providers = BTreeMap::new();
    providers.insert("openai".into(), ProviderConfig {
      api_key: String::new(),
      model: "gpt-4o-mini".into(),
      enabled: false,
    });
    providers.insert("anthropic".into(), ProviderConfig {
      api_key: String::new(),
      model: "claude-3-sonnet-20240229".into(),
      enabled: false,
    });
    providers.insert("google".into(), ProviderConfig {
      api_key: String::new(),
      model: "gemini-pro".into(),
      enabled: false,
    });
    providers.insert("perplexity".into(), ProviderConfig {
      api_key: String::new(),
      model: "llama-3-sonar-large-32k-online".into(),
      enabled: false,
    });
    Self {
      providers,
      default_provider: "openai".into(),
      theme: "auto".into(),
      language: "pt-BR".into(),
    }
  }
}

// --- Typed partial updates ---
//
// `deny_unknown_fields` makes the schema check happen at the deserialization
// boundary: a patch carrying a field we don't know is rejected, not spread
// into the record.

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPatch {
  pub name: Option<String>,
  pub email: Option<String>,
  pub last_login_at: Option<DateTime<Utc>>,
  // teacher-only
  pub classes_owned: Option<BTreeSet<String>>,
  pub lessons_created: Option<BTreeSet<String>>,
  // student-only
  pub classes_enrolled: Option<BTreeSet<String>>,
  pub progress: Option<ProgressState>,
  pub stats: Option<StudentStats>,
}

impl User {
  /// Merge a patch. Role-specific fields are applied only when the record's
  /// variant matches; a teacher patch cannot turn a student into a teacher.
  pub fn apply(&mut self, patch: UserPatch) {
    if let Some(name) = patch.name {
      self.name = name;
    }
    if let Some(email) = patch.email {
      self.email = email;
    }
    if let Some(at) = patch.last_login_at {
      self.last_login_at = Some(at);
    }
    match &mut self.role {
      Role::Teacher { classes_owned, lessons_created } => {
        if let Some(v) = patch.classes_owned {
          *classes_owned = v;
        }
        if let Some(v) = patch.lessons_created {
          *lessons_created = v;
        }
      }
      Role::Student { classes_enrolled, progress, stats } => {
        if let Some(v) = patch.classes_enrolled {
          *classes_enrolled = v;
        }
        if let Some(v) = patch.progress {
          *progress = v;
        }
        if let Some(v) = patch.stats {
          *stats = v;
        }
      }
    }
  }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LessonPatch {
  pub title: Option<String>,
  pub category: Option<String>,
  pub exam_target: Option<ExamTarget>,
  pub difficulty: Option<Difficulty>,
  pub base_points: Option<u32>,
  pub estimated_time_minutes: Option<u32>,
  pub prerequisites: Option<BTreeSet<String>>,
  pub status: Option<LessonStatus>,
}

impl Lesson {
  pub fn apply(&mut self, patch: LessonPatch) {
    if let Some(v) = patch.title {
      self.title = v;
    }
    if let Some(v) = patch.category {
      self.category = v;
    }
    if let Some(v) = patch.exam_target {
      self.exam_target = v;
    }
    if let Some(v) = patch.difficulty {
      self.difficulty = v;
    }
    if let Some(v) = patch.base_points {
      self.base_points = v;
    }
    if let Some(v) = patch.estimated_time_minutes {
      self.estimated_time_minutes = v;
    }
    if let Some(v) = patch.prerequisites {
      self.prerequisites = v;
    }
    if let Some(v) = patch.status {
      self.status = v;
    }
  }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassPatch {
  pub name: Option<String>,
  pub focus: Option<ExamTarget>,
  pub student_ids: Option<BTreeSet<String>>,
  pub lesson_ids: Option<BTreeSet<String>>,
  pub active: Option<bool>,
}

impl SchoolClass {
  pub fn apply(&mut self, patch: ClassPatch) {
    if let Some(v) = patch.name {
      self.name = v;
    }
    if let Some(v) = patch.focus {
      self.focus = v;
    }
    if let Some(v) = patch.student_ids {
      self.student_ids = v;
    }
    if let Some(v) = patch.lesson_ids {
      self.lesson_ids = v;
    }
    if let Some(v) = patch.active {
      self.active = v;
    }
  }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentPatch {
  pub due_at: Option<DateTime<Utc>>,
  pub note: Option<String>,
}

impl Assignment {
  pub fn apply(&mut self, patch: AssignmentPatch) {
    if let Some(v) = patch.due_at {
      self.due_at = Some(v);
    }
    if let Some(v) = patch.note {
      self.note = v;
    }
  }
}

/// Patch type for append-only collections. Uninhabited: progress events can
/// never be updated once written.
#[derive(Clone, Debug, Deserialize)]
pub enum Immutable {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn user_json_carries_flat_kind_tag() {
    let user = User {
      name: "Ana".into(),
      email: "ana@example.com".into(),
      last_login_at: None,
      role: Role::Student {
        classes_enrolled: BTreeSet::new(),
        progress: ProgressState::default(),
        stats: StudentStats::default(),
      },
    };
    let v = serde_json::to_value(&user).unwrap();
    assert_eq!(v["kind"], "student");
    assert_eq!(v["email"], "ana@example.com");
    assert_eq!(v["progress"]["current_level"], 1);
  }

  #[test]
  fn patch_rejects_unknown_fields() {
    let raw = serde_json::json!({ "title": "x", "difficlty": "hard" });
    assert!(serde_json::from_value::<LessonPatch>(raw).is_err());
  }

  #[test]
  fn role_mismatched_patch_fields_are_ignored() {
    let mut user = User {
      name: "Rui".into(),
      email: "rui@example.com".into(),
      last_login_at: None,
      role: Role::Teacher {
        classes_owned: BTreeSet::new(),
        lessons_created: BTreeSet::new(),
      },
    };
    user.apply(UserPatch {
      progress: Some(ProgressState { total_points: 999, ..Default::default() }),
      ..Default::default()
    });
    assert!(user.progress().is_none());
  }
}
