//! Observation logs: behavior events, stress readings, enrichment sessions
//! and incident reports.
//!
//! All four logs are append-only. Records are never updated once written;
//! ranks and welfare flags are derived from them.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  animal::AnimalId,
  error::ValidationError,
  ethogram::{BehaviorKind, Outcome},
};

pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 5;

fn default_intensity() -> u8 { MIN_INTENSITY }

// ─── Behavior events ─────────────────────────────────────────────────────────

/// A logged ethogram observation. Dyadic behaviors carry a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
  pub event_id:    Uuid,
  pub actor_id:    AnimalId,
  pub target_id:   Option<AnimalId>,
  pub behavior:    BehaviorKind,
  pub intensity:   u8,
  /// Why the observation was taken (routine scan, post-incident, ...).
  pub reason:      Option<String>,
  pub observer:    Option<String>,
  /// Observation session the event was logged in, if any.
  #[serde(default)]
  pub session_id:  Option<Uuid>,
  /// When the behavior happened.
  pub observed_at: DateTime<Utc>,
  /// Server-assigned; never changes after creation.
  pub recorded_at: DateTime<Utc>,
}

/// A dominance-relevant interaction reduced to its winner and loser.
#[derive(Debug, Clone, PartialEq)]
pub struct Contest {
  pub winner: AnimalId,
  pub loser:  AnimalId,
  pub at:     DateTime<Utc>,
}

impl BehaviorEvent {
  /// Whether `animal` is the actor or the target of this event.
  pub fn involves(&self, animal: &AnimalId) -> bool {
    &self.actor_id == animal || self.target_id.as_ref() == Some(animal)
  }

  /// The contest this event encodes, or `None` when the behavior is not
  /// dominance-relevant or has no target.
  pub fn contest(&self) -> Result<Option<Contest>, ValidationError> {
    let Some(outcome) = self.behavior.dominance_outcome() else {
      return Ok(None);
    };
    let Some(target) = &self.target_id else {
      return Ok(None);
    };
    if target == &self.actor_id {
      return Err(ValidationError::SelfInteraction(self.actor_id.clone()));
    }
    let (winner, loser) = match outcome {
      Outcome::ActorWins => (self.actor_id.clone(), target.clone()),
      Outcome::TargetWins => (target.clone(), self.actor_id.clone()),
    };
    Ok(Some(Contest { winner, loser, at: self.observed_at }))
  }

  /// Total replay order: observation time, then recording time, then id.
  pub fn chronological(a: &Self, b: &Self) -> Ordering {
    a.observed_at
      .cmp(&b.observed_at)
      .then(a.recorded_at.cmp(&b.recorded_at))
      .then(a.event_id.cmp(&b.event_id))
  }
}

/// Input to [`crate::store::ColonyStore::record_behavior`].
/// `recorded_at` is always set by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBehaviorEvent {
  pub actor_id:    AnimalId,
  #[serde(default)]
  pub target_id:   Option<AnimalId>,
  pub behavior:    BehaviorKind,
  #[serde(default = "default_intensity")]
  pub intensity:   u8,
  #[serde(default)]
  pub reason:      Option<String>,
  #[serde(default)]
  pub observer:    Option<String>,
  /// Must name an open session when set.
  #[serde(default)]
  pub session_id:  Option<Uuid>,
  /// Defaults to the recording time.
  #[serde(default)]
  pub observed_at: Option<DateTime<Utc>>,
}

impl NewBehaviorEvent {
  pub fn new(actor_id: impl Into<AnimalId>, behavior: BehaviorKind) -> Self {
    Self {
      actor_id: actor_id.into(),
      target_id: None,
      behavior,
      intensity: MIN_INTENSITY,
      reason: None,
      observer: None,
      session_id: None,
      observed_at: None,
    }
  }

  /// Convenience constructor for a dyadic interaction.
  pub fn dyadic(
    actor_id: impl Into<AnimalId>,
    behavior: BehaviorKind,
    target_id: impl Into<AnimalId>,
  ) -> Self {
    Self { target_id: Some(target_id.into()), ..Self::new(actor_id, behavior) }
  }

  pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
    self.observed_at = Some(observed_at);
    self
  }

  pub fn in_session(mut self, session_id: Uuid) -> Self {
    self.session_id = Some(session_id);
    self
  }

  /// Structural checks that need no store access.
  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.actor_id.as_str().trim().is_empty() {
      return Err(ValidationError::EmptyField { field: "actor_id" });
    }
    if !(MIN_INTENSITY..=MAX_INTENSITY).contains(&self.intensity) {
      return Err(ValidationError::IntensityOutOfRange(self.intensity));
    }
    match &self.target_id {
      Some(target) if target == &self.actor_id => {
        Err(ValidationError::SelfInteraction(self.actor_id.clone()))
      }
      None if self.behavior.requires_target() => {
        Err(ValidationError::MissingTarget(self.behavior.to_string()))
      }
      _ => Ok(()),
    }
  }
}

// ─── Stress ──────────────────────────────────────────────────────────────────

/// Indicator name used for readings built from a [`StressSigns`] checklist.
pub const COMPOSITE_INDICATOR: &str = "composite";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressLog {
  pub log_id:      Uuid,
  pub animal_id:   AnimalId,
  pub indicator:   String,
  pub value:       f64,
  pub notes:       Option<String>,
  pub observed_at: DateTime<Utc>,
  pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStressLog {
  pub animal_id:   AnimalId,
  pub indicator:   String,
  pub value:       f64,
  #[serde(default)]
  pub notes:       Option<String>,
  #[serde(default)]
  pub observed_at: Option<DateTime<Utc>>,
}

impl NewStressLog {
  pub fn new(
    animal_id: impl Into<AnimalId>,
    indicator: impl Into<String>,
    value: f64,
  ) -> Self {
    Self {
      animal_id: animal_id.into(),
      indicator: indicator.into(),
      value,
      notes: None,
      observed_at: None,
    }
  }

  pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
    self.observed_at = Some(observed_at);
    self
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.indicator.trim().is_empty() {
      return Err(ValidationError::EmptyField { field: "indicator" });
    }
    if !self.value.is_finite() {
      return Err(ValidationError::InvalidValue {
        field:  "value",
        reason: format!("{} is not a finite number", self.value),
      });
    }
    Ok(())
  }
}

/// A checklist of observed stress signs, scored into one composite reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSigns {
  pub animal_id:      Option<AnimalId>,
  pub withdrawal:     bool,
  pub fear_grimace:   bool,
  pub self_biting:    bool,
  pub pacing:         bool,
  pub isolation:      bool,
  /// Cortisol in ng/mL.
  pub cortisol_level: Option<f64>,
  /// Observer's raw score, used when no sign is ticked.
  pub stress_score:   f64,
  pub notes:          Option<String>,
  pub observed_at:    Option<DateTime<Utc>>,
}

impl StressSigns {
  /// Weighted sum of ticked signs plus a capped cortisol term, rounded to two
  /// decimals. Falls back to the raw score when nothing contributes.
  pub fn weighted_score(&self) -> f64 {
    let mut weight = 0.0;
    for (present, w) in [
      (self.withdrawal, 2.0),
      (self.fear_grimace, 3.0),
      (self.self_biting, 4.0),
      (self.pacing, 2.0),
      (self.isolation, 1.0),
    ] {
      if present {
        weight += w;
      }
    }
    if let Some(cortisol) = self.cortisol_level
      && cortisol > 0.0
    {
      weight += (cortisol / 10.0).min(5.0);
    }
    let score = if weight > 0.0 { weight } else { self.stress_score };
    (score * 100.0).round() / 100.0
  }

  pub fn into_log(self) -> Result<NewStressLog, ValidationError> {
    let value = self.weighted_score();
    let animal_id = self
      .animal_id
      .ok_or(ValidationError::EmptyField { field: "animal_id" })?;
    Ok(NewStressLog {
      animal_id,
      indicator: COMPOSITE_INDICATOR.to_owned(),
      value,
      notes: self.notes,
      observed_at: self.observed_at,
    })
  }
}

// ─── Enrichment ──────────────────────────────────────────────────────────────

/// How the animal responded to an enrichment item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentOutcome {
  Engaged,
  Partial,
  Ignored,
  Avoided,
}

impl EnrichmentOutcome {
  /// Contribution to the engagement ratio.
  pub fn engagement(self) -> f64 {
    match self {
      Self::Engaged => 1.0,
      Self::Partial => 0.5,
      Self::Ignored | Self::Avoided => 0.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentLog {
  pub log_id:           Uuid,
  pub animal_id:        AnimalId,
  pub item:             String,
  pub duration_minutes: Option<f64>,
  /// Number of presentations covered by this entry.
  pub frequency:        u32,
  pub outcome:          EnrichmentOutcome,
  pub observed_at:      DateTime<Utc>,
  pub recorded_at:      DateTime<Utc>,
}

fn default_frequency() -> u32 { 1 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEnrichmentLog {
  pub animal_id:        AnimalId,
  pub item:             String,
  #[serde(default)]
  pub duration_minutes: Option<f64>,
  #[serde(default = "default_frequency")]
  pub frequency:        u32,
  pub outcome:          EnrichmentOutcome,
  #[serde(default)]
  pub observed_at:      Option<DateTime<Utc>>,
}

impl NewEnrichmentLog {
  pub fn new(
    animal_id: impl Into<AnimalId>,
    item: impl Into<String>,
    outcome: EnrichmentOutcome,
  ) -> Self {
    Self {
      animal_id: animal_id.into(),
      item: item.into(),
      duration_minutes: None,
      frequency: default_frequency(),
      outcome,
      observed_at: None,
    }
  }

  pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
    self.observed_at = Some(observed_at);
    self
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.item.trim().is_empty() {
      return Err(ValidationError::EmptyField { field: "item" });
    }
    if self.frequency == 0 {
      return Err(ValidationError::InvalidValue {
        field:  "frequency",
        reason: "must be at least 1".into(),
      });
    }
    if let Some(minutes) = self.duration_minutes
      && !(minutes.is_finite() && minutes >= 0.0)
    {
      return Err(ValidationError::InvalidValue {
        field:  "duration_minutes",
        reason: format!("{minutes} is not a non-negative number"),
      });
    }
    Ok(())
  }
}

// ─── Incidents ───────────────────────────────────────────────────────────────

/// A free-form incident report: an injury, a fight seen from the corridor,
/// an escape attempt. Optionally tied to one animal and one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
  pub incident_id:    Uuid,
  pub animal_id:      Option<AnimalId>,
  pub session_id:     Option<Uuid>,
  pub reason:         String,
  pub description:    Option<String>,
  /// Link to a photo or video of the incident.
  pub attachment_url: Option<String>,
  pub media_type:     Option<String>,
  pub tags:           Vec<String>,
  pub observed_at:    DateTime<Utc>,
  pub recorded_at:    DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewIncident {
  pub animal_id:      Option<AnimalId>,
  pub session_id:     Option<Uuid>,
  pub reason:         String,
  pub description:    Option<String>,
  pub attachment_url: Option<String>,
  pub media_type:     Option<String>,
  pub tags:           Vec<String>,
  pub observed_at:    Option<DateTime<Utc>>,
}

impl NewIncident {
  pub fn new(reason: impl Into<String>) -> Self {
    Self { reason: reason.into(), ..Default::default() }
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.reason.trim().is_empty() {
      return Err(ValidationError::EmptyField { field: "reason" });
    }
    // Tags are stored comma-joined.
    if let Some(tag) = self
      .tags
      .iter()
      .find(|tag| tag.trim().is_empty() || tag.contains(','))
    {
      return Err(ValidationError::InvalidValue {
        field:  "tags",
        reason: format!("{tag:?} must be non-blank and contain no comma"),
      });
    }
    Ok(())
  }
}
