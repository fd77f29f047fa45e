//! Progress engine: records lesson completions and recomputes the derived
//! gamification state (points, level, streak, badges) for the owning
//! student.
//!
//! Events are append-only; the embedded `ProgressState` is recomputed, not
//! append-written, on every new event. Repeat completions of the same lesson
//! are allowed and re-award points (practice reward).

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::badges::{self, Badge};
use crate::domain::{
  Difficulty, Lesson, ProgressEvent, ProgressState, Record, Role, StudentStats, User, UserPatch,
};
use crate::error::ProgressError;
use crate::store::Store;

/// `round(base_points × score/100 × difficulty multiplier)`.
pub fn points_earned(base_points: u32, score_percent: f64, difficulty: Difficulty) -> u64 {
  (base_points as f64 * (score_percent / 100.0) * difficulty.multiplier()).round() as u64
}

/// `floor(sqrt(points / 100)) + 1` — level 1 at 0 points, 2 at 100, 3 at 400.
pub fn level_for_points(total_points: u64) -> u32 {
  ((total_points as f64 / 100.0).sqrt().floor() as u32) + 1
}

/// Consecutive calendar days with at least one completion, counted backward
/// from `today`; the first gap stops the walk. Multiple events on one day
/// count that day once.
pub fn streak_days(events: &[Record<ProgressEvent>], today: NaiveDate) -> u32 {
  let mut days: Vec<NaiveDate> = events
    .iter()
    .map(|e| e.fields.completed_at.date_naive())
    .collect();
  days.sort_unstable_by(|a, b| b.cmp(a));

  let mut streak = 0u32;
  let mut expected_days_ago = 0i64;
  for day in days {
    let days_ago = (today - day).num_days();
    if days_ago == expected_days_ago {
      streak += 1;
      expected_days_ago += 1;
    } else if days_ago > expected_days_ago {
      break;
    }
    // days_ago < expected_days_ago: another event on an already-counted day.
  }
  streak
}

/// Everything a caller needs to render the result of one completion.
#[derive(Clone, Debug, Serialize)]
pub struct CompletionOutcome {
  pub event: Record<ProgressEvent>,
  pub progress: ProgressState,
  pub stats: StudentStats,
  /// Badges unlocked by this completion, in catalogue order. The UI shows
  /// one notification per entry.
  pub unlocked: Vec<Badge>,
}

/// Read-only view for the student dashboard.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressSummary {
  pub student_id: String,
  pub name: String,
  pub progress: ProgressState,
  pub stats: StudentStats,
  pub badges: Vec<Badge>,
}

pub struct ProgressEngine {
  store: Arc<Store>,
}

impl ProgressEngine {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store }
  }

  /// Record one completion attempt and recompute the student's state.
  ///
  /// `score_percent` is expected to already be in [0, 100]; the transport
  /// layer clamps before calling in, the engine does not re-clamp.
  #[instrument(level = "info", skip(self), fields(%student_id, %lesson_id, score_percent))]
  pub async fn record_completion(
    &self,
    student_id: &str,
    lesson_id: &str,
    score_percent: f64,
    time_spent_minutes: u32,
  ) -> Result<CompletionOutcome, ProgressError> {
    let lesson = self
      .store
      .get::<Lesson>(lesson_id)
      .await
      .ok_or_else(|| ProgressError::LessonNotFound(lesson_id.to_string()))?;
    let student = self
      .store
      .get::<User>(student_id)
      .await
      .ok_or_else(|| ProgressError::UserNotFound(student_id.to_string()))?;
    let Role::Student { progress: prior, .. } = &student.fields.role else {
      return Err(ProgressError::NotAStudent(student_id.to_string()));
    };

    let now = Utc::now();
    let points = points_earned(lesson.fields.base_points, score_percent, lesson.fields.difficulty);
    let event = self
      .store
      .create(ProgressEvent {
        student_id: student_id.to_string(),
        lesson_id: lesson_id.to_string(),
        score_percent,
        time_spent_minutes,
        points_earned: points,
        completed_at: now,
      })
      .await?;

    // All of this student's history, including the event just written.
    let events = self
      .store
      .find::<ProgressEvent, _>(|e| e.fields.student_id == student_id)
      .await;

    let total_points = prior.total_points + points;
    let mut progress = ProgressState {
      total_points,
      current_level: level_for_points(total_points),
      streak_days: streak_days(&events, now.date_naive()),
      last_activity_at: Some(now),
      unlocked_badge_ids: prior.unlocked_badge_ids.clone(),
    };
    let stats = StudentStats {
      lessons_completed: events.len() as u32,
      average_score: events.iter().map(|e| e.fields.score_percent).sum::<f64>()
        / events.len() as f64,
      time_spent_minutes: events.iter().map(|e| e.fields.time_spent_minutes).sum(),
    };

    let unlocked = badges::newly_unlocked(&progress, events.len());
    for badge in &unlocked {
      progress.unlocked_badge_ids.insert(badge.id.to_string());
      info!(target: "progress", %student_id, badge = badge.id, "Badge unlocked");
    }

    let patch = UserPatch {
      progress: Some(progress.clone()),
      stats: Some(stats.clone()),
      ..Default::default()
    };
    self.store.update::<User>(student_id, patch).await?;

    info!(
      target: "progress",
      %student_id,
      %lesson_id,
      points,
      level = progress.current_level,
      streak = progress.streak_days,
      "Completion recorded"
    );
    Ok(CompletionOutcome { event, progress, stats, unlocked })
  }

  pub async fn summary(&self, student_id: &str) -> Result<ProgressSummary, ProgressError> {
    let user = self
      .store
      .get::<User>(student_id)
      .await
      .ok_or_else(|| ProgressError::UserNotFound(student_id.to_string()))?;
    let Role::Student { progress, stats, .. } = &user.fields.role else {
      return Err(ProgressError::NotAStudent(student_id.to_string()));
    };
    let badges = progress
      .unlocked_badge_ids
      .iter()
      .filter_map(|id| badges::by_id(id))
      .collect();
    Ok(ProgressSummary {
      student_id: user.id.clone(),
      name: user.fields.name.clone(),
      progress: progress.clone(),
      stats: stats.clone(),
      badges,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ExamTarget, LessonStatus};
  use crate::users::{Directory, NewProfile};
  use chrono::{DateTime, Days};
  use std::collections::BTreeSet;

  #[test]
  fn points_follow_base_score_and_multiplier() {
    // round(10 × 0.8 × 1.2) = round(9.6) = 10
    assert_eq!(points_earned(10, 80.0, Difficulty::Medium), 10);
    assert_eq!(points_earned(10, 100.0, Difficulty::Easy), 10);
    assert_eq!(points_earned(10, 100.0, Difficulty::Hard), 15);
    assert_eq!(points_earned(20, 50.0, Difficulty::Easy), 10);
    assert_eq!(points_earned(10, 0.0, Difficulty::Hard), 0);
  }

  #[test]
  fn level_thresholds_and_monotonicity() {
    assert_eq!(level_for_points(0), 1);
    assert_eq!(level_for_points(99), 1);
    assert_eq!(level_for_points(100), 2);
    assert_eq!(level_for_points(399), 2);
    assert_eq!(level_for_points(400), 3);

    let mut last = 0;
    for points in (0..5_000).step_by(37) {
      let level = level_for_points(points);
      assert!(level >= last, "level regressed at {points} points");
      last = level;
    }
  }

  fn event_on(day: NaiveDate) -> Record<ProgressEvent> {
    let at: DateTime<Utc> = day.and_hms_opt(12, 0, 0).expect("valid time").and_utc();
    Record {
      id: "e".into(),
      created_at: at,
      updated_at: at,
      fields: ProgressEvent {
        student_id: "s".into(),
        lesson_id: "l".into(),
        score_percent: 90.0,
        time_spent_minutes: 10,
        points_earned: 9,
        completed_at: at,
      },
    }
  }

  #[test]
  fn streak_counts_consecutive_days_ending_today() {
    let today = NaiveDate::from_ymd_opt(2026, 8, 8).expect("valid date");
    let events: Vec<_> = (0..3)
      .map(|n| event_on(today.checked_sub_days(Days::new(n)).expect("date")))
      .collect();
    assert_eq!(streak_days(&events, today), 3);
  }

  #[test]
  fn gap_breaks_the_streak() {
    let today = NaiveDate::from_ymd_opt(2026, 8, 8).expect("valid date");
    // Today and two days ago, yesterday skipped.
    let events = vec![
      event_on(today),
      event_on(today.checked_sub_days(Days::new(2)).expect("date")),
    ];
    assert_eq!(streak_days(&events, today), 1);
  }

  #[test]
  fn no_activity_today_means_no_streak() {
    let today = NaiveDate::from_ymd_opt(2026, 8, 8).expect("valid date");
    let events = vec![event_on(today.checked_sub_days(Days::new(1)).expect("date"))];
    assert_eq!(streak_days(&events, today), 0);
    assert_eq!(streak_days(&[], today), 0);
  }

  #[test]
  fn same_day_events_do_not_double_count() {
    let today = NaiveDate::from_ymd_opt(2026, 8, 8).expect("valid date");
    let yesterday = today.checked_sub_days(Days::new(1)).expect("date");
    let events = vec![event_on(today), event_on(today), event_on(yesterday)];
    assert_eq!(streak_days(&events, today), 2);
  }

  async fn engine_fixture() -> (tempfile::TempDir, Arc<Store>, ProgressEngine, String, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::open(dir.path().join("edudash_data.json")).expect("open"));
    let directory = Directory::new(store.clone());
    let student = directory
      .register_student(NewProfile { name: "Bia".into(), email: "bia@example.com".into() })
      .await
      .expect("register");
    let lesson = store
      .create(Lesson {
        title: "Reading: ENEM 2019".into(),
        category: "reading".into(),
        exam_target: ExamTarget::Enem,
        difficulty: Difficulty::Medium,
        base_points: 10,
        estimated_time_minutes: 20,
        created_by_teacher_id: None,
        prerequisites: BTreeSet::new(),
        status: LessonStatus::Active,
      })
      .await
      .expect("lesson");
    let engine = ProgressEngine::new(store.clone());
    (dir, store, engine, student.id, lesson.id)
  }

  #[tokio::test]
  async fn completion_awards_points_and_updates_state() {
    let (_dir, store, engine, student_id, lesson_id) = engine_fixture().await;

    let outcome = engine
      .record_completion(&student_id, &lesson_id, 80.0, 25)
      .await
      .expect("recorded");
    assert_eq!(outcome.event.fields.points_earned, 10);
    assert_eq!(outcome.progress.total_points, 10);
    assert_eq!(outcome.progress.current_level, 1);
    assert_eq!(outcome.progress.streak_days, 1);
    assert_eq!(outcome.stats.lessons_completed, 1);
    assert_eq!(outcome.stats.time_spent_minutes, 25);

    // The recomputed state is persisted on the user record.
    let user = store.get::<User>(&student_id).await.expect("user");
    assert_eq!(user.fields.progress().expect("student").total_points, 10);
  }

  #[tokio::test]
  async fn first_lesson_badge_unlocks_exactly_once() {
    let (_dir, _store, engine, student_id, lesson_id) = engine_fixture().await;

    let first = engine
      .record_completion(&student_id, &lesson_id, 100.0, 10)
      .await
      .expect("recorded");
    let ids: Vec<&str> = first.unlocked.iter().map(|b| b.id).collect();
    assert_eq!(ids, ["first_lesson"]);

    let second = engine
      .record_completion(&student_id, &lesson_id, 100.0, 10)
      .await
      .expect("recorded");
    assert!(second.unlocked.is_empty());
    assert!(second.progress.unlocked_badge_ids.contains("first_lesson"));
  }

  #[tokio::test]
  async fn repeat_completions_re_award_points() {
    let (_dir, _store, engine, student_id, lesson_id) = engine_fixture().await;

    engine.record_completion(&student_id, &lesson_id, 100.0, 10).await.expect("first");
    let second = engine
      .record_completion(&student_id, &lesson_id, 50.0, 10)
      .await
      .expect("second");
    // 12 + 6: same lesson, two events, no cap.
    assert_eq!(second.progress.total_points, 18);
    assert_eq!(second.stats.lessons_completed, 2);
    assert!((second.stats.average_score - 75.0).abs() < f64::EPSILON);
  }

  #[tokio::test]
  async fn unknown_lesson_and_non_students_are_rejected() {
    let (_dir, store, engine, student_id, lesson_id) = engine_fixture().await;

    let err = engine
      .record_completion(&student_id, "missing", 80.0, 5)
      .await
      .unwrap_err();
    assert!(matches!(err, ProgressError::LessonNotFound(_)));

    let err = engine
      .record_completion("missing", &lesson_id, 80.0, 5)
      .await
      .unwrap_err();
    assert!(matches!(err, ProgressError::UserNotFound(_)));

    let directory = Directory::new(store.clone());
    let teacher = directory
      .register_teacher(NewProfile { name: "Rui".into(), email: "rui@example.com".into() })
      .await
      .expect("teacher");
    let err = engine
      .record_completion(&teacher.id, &lesson_id, 80.0, 5)
      .await
      .unwrap_err();
    assert!(matches!(err, ProgressError::NotAStudent(_)));
  }

  #[tokio::test]
  async fn summary_reports_unlocked_badges() {
    let (_dir, _store, engine, student_id, lesson_id) = engine_fixture().await;
    engine.record_completion(&student_id, &lesson_id, 90.0, 15).await.expect("recorded");

    let summary = engine.summary(&student_id).await.expect("summary");
    assert_eq!(summary.name, "Bia");
    assert_eq!(summary.badges.len(), 1);
    assert_eq!(summary.badges[0].id, "first_lesson");
  }
}
