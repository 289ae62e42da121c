//! Error type for `behavmetrix-store-sqlite`.

use behavmetrix_core::animal::AnimalId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value outside its enum vocabulary.
  #[error("unexpected {column} value: {value:?}")]
  Decode {
    column: &'static str,
    value:  String,
  },

  #[error("animal {0} already exists")]
  DuplicateAnimal(AnimalId),

  #[error("value {0} does not fit in a SQLite integer")]
  Overflow(u64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
