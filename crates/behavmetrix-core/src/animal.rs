//! Animal: the roster record that the engines write their caches onto.
//!
//! An animal's rank and welfare flag are derived from the append-only logs;
//! every other field comes from roster import. Animals are never deleted,
//! only deactivated.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{alert::WelfareFlag, error::ValidationError};

// ─── Identity ────────────────────────────────────────────────────────────────

/// The facility's stable identifier for an animal (tattoo or colony ID).
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AnimalId(String);

impl AnimalId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for AnimalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for AnimalId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for AnimalId {
  fn from(s: String) -> Self { Self(s) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
  #[serde(rename = "M", alias = "m")]
  Male,
  #[serde(rename = "F", alias = "f")]
  Female,
}

// ─── Rank ────────────────────────────────────────────────────────────────────

/// Where the current rank value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrigin {
  /// Derived from the interaction log by the rank engine.
  #[default]
  Computed,
  /// Set by hand. Pinned until released or explicitly replaced.
  Manual,
}

/// The cached dominance rating of an animal, tagged with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rank {
  pub value:      f64,
  pub origin:     RankOrigin,
  pub updated_at: DateTime<Utc>,
}

impl Rank {
  pub fn computed(value: f64, at: DateTime<Utc>) -> Self {
    Self { value, origin: RankOrigin::Computed, updated_at: at }
  }

  pub fn manual(value: f64, at: DateTime<Utc>) -> Self {
    Self { value, origin: RankOrigin::Manual, updated_at: at }
  }

  pub fn is_manual(&self) -> bool { self.origin == RankOrigin::Manual }
}

// ─── Animal ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animal {
  pub animal_id:         AnimalId,
  pub name:              Option<String>,
  pub cage_id:           String,
  pub sex:               Sex,
  /// Age in years.
  pub age:               Option<f64>,
  pub weight_kg:         Option<f64>,
  pub matriline:         Option<String>,
  pub rank:              Rank,
  /// Bumped on every rank write; the optimistic-concurrency token.
  pub rank_version:      u64,
  /// `None` until the alert engine has had enough data to evaluate.
  pub welfare_flag:      Option<WelfareFlag>,
  pub enrichment_status: Option<String>,
  pub active:            bool,
  pub created_at:        DateTime<Utc>,
}

fn check_measurements(age: Option<f64>, weight_kg: Option<f64>) -> Result<(), ValidationError> {
  if let Some(age) = age
    && !(age.is_finite() && age >= 0.0)
  {
    return Err(ValidationError::InvalidValue {
      field:  "age",
      reason: format!("{age} is not a non-negative number"),
    });
  }
  if let Some(weight) = weight_kg
    && !(weight.is_finite() && weight > 0.0)
  {
    return Err(ValidationError::InvalidValue {
      field:  "weight_kg",
      reason: format!("{weight} is not a positive number"),
    });
  }
  Ok(())
}

// ─── NewAnimal ───────────────────────────────────────────────────────────────

/// A validated roster row. Input to
/// [`crate::store::ColonyStore::add_animal`] and
/// [`crate::store::ColonyStore::upsert_animal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnimal {
  pub animal_id:         AnimalId,
  #[serde(default)]
  pub name:              Option<String>,
  pub cage_id:           String,
  pub sex:               Sex,
  #[serde(default)]
  pub age:               Option<f64>,
  #[serde(default)]
  pub weight_kg:         Option<f64>,
  #[serde(default)]
  pub matriline:         Option<String>,
  #[serde(default)]
  pub enrichment_status: Option<String>,
}

impl NewAnimal {
  pub fn new(
    animal_id: impl Into<AnimalId>,
    cage_id: impl Into<String>,
    sex: Sex,
  ) -> Self {
    Self {
      animal_id: animal_id.into(),
      name: None,
      cage_id: cage_id.into(),
      sex,
      age: None,
      weight_kg: None,
      matriline: None,
      enrichment_status: None,
    }
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.animal_id.as_str().trim().is_empty() {
      return Err(ValidationError::EmptyField { field: "animal_id" });
    }
    if self.cage_id.trim().is_empty() {
      return Err(ValidationError::EmptyField { field: "cage_id" });
    }
    check_measurements(self.age, self.weight_kg)
  }

  /// Build the stored record for a fresh import: initial rating, no flag.
  pub fn into_animal(self, initial_rating: f64, now: DateTime<Utc>) -> Animal {
    Animal {
      animal_id:         self.animal_id,
      name:              self.name,
      cage_id:           self.cage_id,
      sex:               self.sex,
      age:               self.age,
      weight_kg:         self.weight_kg,
      matriline:         self.matriline,
      rank:              Rank::computed(initial_rating, now),
      rank_version:      0,
      welfare_flag:      None,
      enrichment_status: self.enrichment_status,
      active:            true,
      created_at:        now,
    }
  }
}

// ─── AnimalPatch ─────────────────────────────────────────────────────────────

/// A partial roster edit. Absent fields keep their stored value; rank, flag
/// and activation have their own operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimalPatch {
  pub name:              Option<String>,
  pub cage_id:           Option<String>,
  pub sex:               Option<Sex>,
  pub age:               Option<f64>,
  pub weight_kg:         Option<f64>,
  pub matriline:         Option<String>,
  pub enrichment_status: Option<String>,
}

impl AnimalPatch {
  pub fn is_empty(&self) -> bool { *self == Self::default() }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.is_empty() {
      return Err(ValidationError::EmptyField { field: "patch" });
    }
    if self.cage_id.as_deref().is_some_and(|c| c.trim().is_empty()) {
      return Err(ValidationError::EmptyField { field: "cage_id" });
    }
    check_measurements(self.age, self.weight_kg)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rank::DEFAULT_INITIAL_RATING;

  #[test]
  fn roster_row_requires_ids() {
    let mut row = NewAnimal::new("M1", "C-01", Sex::Male);
    assert!(row.validate().is_ok());

    row.cage_id = "  ".into();
    assert_eq!(
      row.validate(),
      Err(ValidationError::EmptyField { field: "cage_id" })
    );
  }

  #[test]
  fn roster_row_rejects_negative_weight() {
    let mut row = NewAnimal::new("F7", "C-02", Sex::Female);
    row.weight_kg = Some(-3.0);
    assert!(matches!(
      row.validate(),
      Err(ValidationError::InvalidValue { field: "weight_kg", .. })
    ));
  }

  #[test]
  fn fresh_animal_starts_at_initial_rating_without_flag() {
    let animal = NewAnimal::new("M1", "C-01", Sex::Male)
      .into_animal(DEFAULT_INITIAL_RATING, Utc::now());
    assert_eq!(animal.rank.value, DEFAULT_INITIAL_RATING);
    assert_eq!(animal.rank.origin, RankOrigin::Computed);
    assert!(animal.welfare_flag.is_none());
    assert!(animal.active);
  }

  #[test]
  fn patch_rejects_empty_and_bad_fields() {
    assert!(matches!(
      AnimalPatch::default().validate(),
      Err(ValidationError::EmptyField { field: "patch" })
    ));

    let blank_cage = AnimalPatch { cage_id: Some("  ".into()), ..Default::default() };
    assert!(matches!(
      blank_cage.validate(),
      Err(ValidationError::EmptyField { field: "cage_id" })
    ));

    let heavy = AnimalPatch { weight_kg: Some(-2.0), ..Default::default() };
    assert!(heavy.validate().is_err());

    let moved = AnimalPatch { cage_id: Some("C-09".into()), ..Default::default() };
    assert!(moved.validate().is_ok());
  }
}
