//! Badge catalogue: a fixed, ordered set of achievement definitions.
//!
//! Badges are permanent: once an id is in a student's `unlocked_badge_ids`
//! it stays there, even if the underlying stat later regressed (which does
//! not happen under normal operation, since points and level only grow).

use serde::Serialize;

use crate::domain::ProgressState;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct Badge {
  pub id: &'static str,
  pub name: &'static str,
  pub description: &'static str,
  pub icon: &'static str,
}

pub struct BadgeDef {
  pub badge: Badge,
  /// Evaluated against the freshly recomputed state and the student's total
  /// completion count.
  pub unlocked: fn(&ProgressState, usize) -> bool,
}

fn any_completion(_: &ProgressState, completions: usize) -> bool {
  completions >= 1
}

fn week_streak(progress: &ProgressState, _: usize) -> bool {
  progress.streak_days >= 7
}

fn level_five(progress: &ProgressState, _: usize) -> bool {
  progress.current_level >= 5
}

fn thousand_points(progress: &ProgressState, _: usize) -> bool {
  progress.total_points >= 1000
}

/// Catalogue order is the unlock order when several conditions become true
/// in the same completion.
pub const CATALOGUE: &[BadgeDef] = &[
  BadgeDef {
    badge: Badge {
      id: "first_lesson",
      name: "First Step",
      description: "Complete sua primeira lição",
      icon: "🥇",
    },
    unlocked: any_completion,
  },
  BadgeDef {
    badge: Badge {
      id: "streak_7",
      name: "Streak Champion",
      description: "7 dias consecutivos",
      icon: "🔥",
    },
    unlocked: week_streak,
  },
  BadgeDef {
    badge: Badge {
      id: "level_5",
      name: "Level Master",
      description: "Alcance o nível 5",
      icon: "⭐",
    },
    unlocked: level_five,
  },
  BadgeDef {
    badge: Badge {
      id: "points_1000",
      name: "Point Collector",
      description: "1000 pontos totais",
      icon: "💎",
    },
    unlocked: thousand_points,
  },
];

/// Catalogue entries not yet unlocked whose condition now holds, in
/// catalogue order.
pub fn newly_unlocked(progress: &ProgressState, completions: usize) -> Vec<Badge> {
  CATALOGUE
    .iter()
    .filter(|def| !progress.unlocked_badge_ids.contains(def.badge.id))
    .filter(|def| (def.unlocked)(progress, completions))
    .map(|def| def.badge)
    .collect()
}

pub fn by_id(id: &str) -> Option<Badge> {
  CATALOGUE.iter().map(|def| def.badge).find(|b| b.id == id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_completion_unlocks_only_first_lesson() {
    let progress = ProgressState { total_points: 12, ..Default::default() };
    let unlocked = newly_unlocked(&progress, 1);
    assert_eq!(unlocked.len(), 1);
    assert_eq!(unlocked[0].id, "first_lesson");
  }

  #[test]
  fn already_unlocked_badges_are_not_reported_again() {
    let mut progress = ProgressState { total_points: 12, ..Default::default() };
    progress.unlocked_badge_ids.insert("first_lesson".into());
    assert!(newly_unlocked(&progress, 2).is_empty());
  }

  #[test]
  fn thresholds_unlock_in_catalogue_order() {
    let progress = ProgressState {
      total_points: 1600,
      current_level: 5,
      streak_days: 7,
      ..Default::default()
    };
    let ids: Vec<&str> = newly_unlocked(&progress, 20).iter().map(|b| b.id).collect();
    assert_eq!(ids, ["first_lesson", "streak_7", "level_5", "points_1000"]);
  }
}
