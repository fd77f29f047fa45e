//! Error taxonomy, one enum per component.
//!
//! Store and directory errors are either caller mistakes (validation, not
//! found) or data-corruption/programmer errors; gateway errors are always
//! recoverable and end up as user-visible messages. None of these drive
//! normal control flow: an empty query result is a value, not an error.

use std::time::Duration;

use thiserror::Error;

use crate::domain::UserKind;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("unknown collection: {0}")]
  UnknownCollection(String),
  #[error("invalid document format: {0}")]
  InvalidDocumentFormat(String),
  #[error("storage io: {0}")]
  Io(#[from] std::io::Error),
  #[error("storage encoding: {0}")]
  Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
  #[error("validation: {0}")]
  Validation(String),
  #[error("user not found: {email} ({kind})")]
  UserNotFound { email: String, kind: UserKind },
  #[error("email already registered for {kind}: {email}")]
  DuplicateEmail { email: String, kind: UserKind },
  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ProgressError {
  #[error("lesson not found: {0}")]
  LessonNotFound(String),
  #[error("user not found: {0}")]
  UserNotFound(String),
  #[error("user is not a student: {0}")]
  NotAStudent(String),
  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("provider not configured or disabled: {0}")]
  ProviderNotConfigured(String),
  #[error("rate limited; retry in {}s", .0.as_secs().max(1))]
  RateLimited(Duration),
  #[error("provider request failed: {0}")]
  RequestFailed(String),
}
