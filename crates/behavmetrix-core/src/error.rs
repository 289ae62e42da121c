//! Error types for `behavmetrix-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::animal::AnimalId;

/// A rejected input. Always the caller's fault; surfaced as a 4xx by the API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
  #[error("self-interaction: {0} cannot be both actor and target")]
  SelfInteraction(AnimalId),

  #[error("unknown animal: {0}")]
  UnknownAnimal(AnimalId),

  #[error("animal {0} is deactivated")]
  InactiveAnimal(AnimalId),

  #[error("animal {0} already exists")]
  DuplicateAnimal(AnimalId),

  #[error("unknown observation session: {0}")]
  UnknownSession(Uuid),

  #[error("observation session {0} is closed")]
  SessionClosed(Uuid),

  #[error("behavior {0} requires a target animal")]
  MissingTarget(String),

  #[error("intensity {0} is outside 1..=5")]
  IntensityOutOfRange(u8),

  #[error("{field} must not be empty")]
  EmptyField { field: &'static str },

  #[error("invalid {field}: {reason}")]
  InvalidValue {
    field:  &'static str,
    reason: String,
  },
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation error: {0}")]
  Validation(#[from] ValidationError),

  #[error("animal not found: {0}")]
  AnimalNotFound(AnimalId),

  #[error("observation session not found: {0}")]
  SessionNotFound(Uuid),

  /// The optimistic rank guard tripped on every attempt.
  #[error("rank update conflicted {attempts} times; retry the request")]
  ConcurrencyConflict { attempts: usize },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
