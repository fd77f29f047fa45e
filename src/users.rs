//! Identity directory: teacher/student registration, login resolution by
//! email + kind, and the volatile current session.
//!
//! Login is local record selection, not authentication: resolving a user
//! stamps `last_login_at` and opens an in-memory session. The session is
//! never written to the store; restarting the process just shows the
//! login/selection flow again.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::domain::{ProgressState, Record, Role, StudentStats, User, UserKind, UserPatch};
use crate::error::DirectoryError;
use crate::store::{FieldFilter, FieldFilters, Store};

/// Ephemeral session marker handed to the frontend so it can re-enter a
/// dashboard without re-selecting a user.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
  pub user_id: String,
  pub email: String,
  pub kind: UserKind,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewProfile {
  pub name: String,
  pub email: String,
}

pub struct Directory {
  store: Arc<Store>,
  session: RwLock<Option<Session>>,
}

impl Directory {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store, session: RwLock::new(None) }
  }

  #[instrument(level = "info", skip(self, profile), fields(email = %profile.email))]
  pub async fn register_teacher(&self, profile: NewProfile) -> Result<Record<User>, DirectoryError> {
    let role = Role::Teacher {
      classes_owned: Default::default(),
      lessons_created: Default::default(),
    };
    self.register(profile, role).await
  }

  #[instrument(level = "info", skip(self, profile), fields(email = %profile.email))]
  pub async fn register_student(&self, profile: NewProfile) -> Result<Record<User>, DirectoryError> {
    let role = Role::Student {
      classes_enrolled: Default::default(),
      progress: ProgressState::default(),
      stats: StudentStats::default(),
    };
    self.register(profile, role).await
  }

  async fn register(&self, profile: NewProfile, role: Role) -> Result<Record<User>, DirectoryError> {
    let name = profile.name.trim().to_string();
    let email = profile.email.trim().to_string();
    if name.is_empty() {
      return Err(DirectoryError::Validation("name must not be empty".into()));
    }
    if email.is_empty() {
      return Err(DirectoryError::Validation("email must not be empty".into()));
    }

    let user = User { name, email, last_login_at: None, role };
    let kind = user.kind();

    // Registration rejects duplicate (email, kind) pairs. Restored backups
    // may still contain duplicates; resolve() keeps its first-match rule.
    if !self.lookup(&user.email, kind).await?.is_empty() {
      return Err(DirectoryError::DuplicateEmail { email: user.email, kind });
    }

    let record = self.store.create(user).await?;
    info!(target: "directory", id = %record.id, %kind, "User registered");
    Ok(record)
  }

  async fn lookup(&self, email: &str, kind: UserKind) -> Result<Vec<Record<User>>, DirectoryError> {
    let mut filters = FieldFilters::new();
    filters.insert("email".into(), FieldFilter::Eq(email.into()));
    filters.insert("kind".into(), FieldFilter::Eq(kind.to_string().into()));
    Ok(self.store.matching::<User>(&filters).await?)
  }

  /// Resolve a user by email + kind. First match wins when duplicates exist
  /// in the document. Stamps `last_login_at` on success.
  #[instrument(level = "info", skip(self), fields(%email, %kind))]
  pub async fn resolve(&self, email: &str, kind: UserKind) -> Result<Record<User>, DirectoryError> {
    let Some(found) = self.lookup(email, kind).await?.into_iter().next() else {
      return Err(DirectoryError::UserNotFound { email: email.to_string(), kind });
    };
    let patch = UserPatch { last_login_at: Some(Utc::now()), ..Default::default() };
    let stamped = self.store.update::<User>(&found.id, patch).await?;
    Ok(stamped.unwrap_or(found))
  }

  /// Resolve and open a session for the user.
  pub async fn login(&self, email: &str, kind: UserKind) -> Result<Record<User>, DirectoryError> {
    let user = self.resolve(email, kind).await?;
    let session = Session {
      user_id: user.id.clone(),
      email: user.fields.email.clone(),
      kind,
    };
    *self.session.write().await = Some(session);
    info!(target: "directory", id = %user.id, %kind, "Session opened");
    Ok(user)
  }

  pub async fn end_session(&self) {
    *self.session.write().await = None;
  }

  pub async fn current_session(&self) -> Option<Session> {
    self.session.read().await.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_directory() -> (tempfile::TempDir, Directory) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path().join("edudash_data.json")).expect("open");
    (dir, Directory::new(Arc::new(store)))
  }

  fn profile(name: &str, email: &str) -> NewProfile {
    NewProfile { name: name.into(), email: email.into() }
  }

  #[tokio::test]
  async fn registration_requires_name_and_email() {
    let (_dir, directory) = temp_directory();
    let err = directory.register_student(profile("", "a@b.c")).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Validation(_)));
    let err = directory.register_teacher(profile("Ana", "   ")).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Validation(_)));
  }

  #[tokio::test]
  async fn duplicate_email_same_kind_is_rejected() {
    let (_dir, directory) = temp_directory();
    directory.register_student(profile("Ana", "ana@example.com")).await.unwrap();
    let err = directory
      .register_student(profile("Ana Clone", "ana@example.com"))
      .await
      .unwrap_err();
    assert!(matches!(err, DirectoryError::DuplicateEmail { .. }));

    // Same email with the other kind is a different identity.
    directory.register_teacher(profile("Ana", "ana@example.com")).await.unwrap();
  }

  #[tokio::test]
  async fn resolve_matches_email_and_kind() {
    let (_dir, directory) = temp_directory();
    directory.register_teacher(profile("Rui", "rui@example.com")).await.unwrap();

    let err = directory.resolve("rui@example.com", UserKind::Student).await.unwrap_err();
    assert!(matches!(err, DirectoryError::UserNotFound { .. }));

    let user = directory.resolve("rui@example.com", UserKind::Teacher).await.unwrap();
    assert_eq!(user.fields.name, "Rui");
    assert!(user.fields.last_login_at.is_some());
  }

  #[tokio::test]
  async fn login_opens_session_and_logout_clears_it() {
    let (_dir, directory) = temp_directory();
    let created = directory.register_student(profile("Bia", "bia@example.com")).await.unwrap();

    assert!(directory.current_session().await.is_none());
    directory.login("bia@example.com", UserKind::Student).await.unwrap();
    let session = directory.current_session().await.expect("session open");
    assert_eq!(session.user_id, created.id);
    assert_eq!(session.kind, UserKind::Student);

    directory.end_session().await;
    assert!(directory.current_session().await.is_none());
  }
}
