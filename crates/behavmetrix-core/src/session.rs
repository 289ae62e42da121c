//! Observation sessions: a bounded stretch of watching one cage or group.
//! Behavior events and incidents may reference the session they were
//! recorded in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{error::ValidationError, log::BehaviorEvent};

/// How the observations in a session were captured.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionMode {
  /// Logged while watching.
  #[default]
  RealTime,
  /// Transcribed afterwards from notes or video.
  Retrospective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSession {
  pub session_id: Uuid,
  pub name:       Option<String>,
  pub mode:       SessionMode,
  pub observer:   Option<String>,
  pub cage_id:    Option<String>,
  pub reason:     Option<String>,
  pub notes:      Option<String>,
  pub started_at: DateTime<Utc>,
  /// `None` while the session is open.
  pub ended_at:   Option<DateTime<Utc>>,
}

impl ObservationSession {
  pub fn is_open(&self) -> bool { self.ended_at.is_none() }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSession {
  pub name:       Option<String>,
  pub mode:       SessionMode,
  pub observer:   Option<String>,
  pub cage_id:    Option<String>,
  pub reason:     Option<String>,
  pub notes:      Option<String>,
  /// Defaults to the recording time.
  pub started_at: Option<DateTime<Utc>>,
}

/// Body of a close request. Notes, when given, replace the stored notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseSession {
  /// Defaults to now.
  pub ended_at: Option<DateTime<Utc>>,
  pub notes:    Option<String>,
}

impl CloseSession {
  /// Resolve the end time against `session`, rejecting one before its start.
  pub fn ended_at(
    &self,
    session: &ObservationSession,
    now: DateTime<Utc>,
  ) -> Result<DateTime<Utc>, ValidationError> {
    if !session.is_open() {
      return Err(ValidationError::SessionClosed(session.session_id));
    }
    let ended_at = self.ended_at.unwrap_or(now);
    if ended_at < session.started_at {
      return Err(ValidationError::InvalidValue {
        field:  "ended_at",
        reason: format!("{ended_at} is before the session start {}", session.started_at),
      });
    }
    Ok(ended_at)
  }
}

/// A session together with the behavior events logged in it, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
  #[serde(flatten)]
  pub session: ObservationSession,
  pub events:  Vec<BehaviorEvent>,
}
