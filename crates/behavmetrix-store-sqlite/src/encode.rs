//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with microsecond
//! precision, so text comparison in SQL matches chronological order. UUIDs
//! are hyphenated lowercase strings; enums use their snake_case names.

use std::str::FromStr;

use behavmetrix_core::{
  alert::WelfareFlag,
  animal::{Animal, Rank, RankOrigin, Sex},
  ethogram::BehaviorKind,
  log::{BehaviorEvent, EnrichmentLog, EnrichmentOutcome, Incident, StressLog},
  session::{ObservationSession, SessionMode},
  store::RankCacheState,
};
use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

/// Drop precision the column cannot hold, so values handed back to callers
/// equal what a later read returns.
pub fn stamp(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_count(n: u64) -> Result<i64> { i64::try_from(n).map_err(|_| Error::Overflow(n)) }

fn decode_count(column: &'static str, n: i64) -> Result<u64> {
  u64::try_from(n).map_err(|_| Error::Decode { column, value: n.to_string() })
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_sex(sex: Sex) -> &'static str {
  match sex {
    Sex::Male => "M",
    Sex::Female => "F",
  }
}

fn decode_sex(s: &str) -> Result<Sex> {
  match s {
    "M" => Ok(Sex::Male),
    "F" => Ok(Sex::Female),
    other => Err(Error::Decode { column: "sex", value: other.to_owned() }),
  }
}

pub fn encode_origin(origin: RankOrigin) -> &'static str {
  match origin {
    RankOrigin::Computed => "computed",
    RankOrigin::Manual => "manual",
  }
}

fn decode_origin(s: &str) -> Result<RankOrigin> {
  match s {
    "computed" => Ok(RankOrigin::Computed),
    "manual" => Ok(RankOrigin::Manual),
    other => Err(Error::Decode { column: "rank_origin", value: other.to_owned() }),
  }
}

pub fn encode_outcome(outcome: EnrichmentOutcome) -> &'static str {
  match outcome {
    EnrichmentOutcome::Engaged => "engaged",
    EnrichmentOutcome::Partial => "partial",
    EnrichmentOutcome::Ignored => "ignored",
    EnrichmentOutcome::Avoided => "avoided",
  }
}

fn decode_outcome(s: &str) -> Result<EnrichmentOutcome> {
  match s {
    "engaged" => Ok(EnrichmentOutcome::Engaged),
    "partial" => Ok(EnrichmentOutcome::Partial),
    "ignored" => Ok(EnrichmentOutcome::Ignored),
    "avoided" => Ok(EnrichmentOutcome::Avoided),
    other => Err(Error::Decode { column: "outcome", value: other.to_owned() }),
  }
}

fn decode_behavior(s: &str) -> Result<BehaviorKind> {
  BehaviorKind::from_str(s)
    .map_err(|_| Error::Decode { column: "behavior", value: s.to_owned() })
}

fn decode_mode(s: &str) -> Result<SessionMode> {
  SessionMode::from_str(s).map_err(|_| Error::Decode { column: "mode", value: s.to_owned() })
}

pub fn encode_tags(tags: &[String]) -> String { tags.join(",") }

fn decode_tags(s: &str) -> Vec<String> {
  s.split(',').filter(|t| !t.is_empty()).map(str::to_owned).collect()
}

fn decode_flag(s: &str) -> Result<WelfareFlag> {
  WelfareFlag::from_str(s)
    .map_err(|_| Error::Decode { column: "welfare_flag", value: s.to_owned() })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawAnimal::from_row`].
pub const ANIMAL_COLUMNS: &str = "animal_id, name, cage_id, sex, age, weight_kg, matriline,
   rank_value, rank_origin, rank_updated_at, rank_version,
   welfare_flag, enrichment_status, active, created_at";

/// Raw values read directly from an `animals` row.
pub struct RawAnimal {
  pub animal_id:         String,
  pub name:              Option<String>,
  pub cage_id:           String,
  pub sex:               String,
  pub age:               Option<f64>,
  pub weight_kg:         Option<f64>,
  pub matriline:         Option<String>,
  pub rank_value:        f64,
  pub rank_origin:       String,
  pub rank_updated_at:   String,
  pub rank_version:      i64,
  pub welfare_flag:      Option<String>,
  pub enrichment_status: Option<String>,
  pub active:            bool,
  pub created_at:        String,
}

impl RawAnimal {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      animal_id:         row.get(0)?,
      name:              row.get(1)?,
      cage_id:           row.get(2)?,
      sex:               row.get(3)?,
      age:               row.get(4)?,
      weight_kg:         row.get(5)?,
      matriline:         row.get(6)?,
      rank_value:        row.get(7)?,
      rank_origin:       row.get(8)?,
      rank_updated_at:   row.get(9)?,
      rank_version:      row.get(10)?,
      welfare_flag:      row.get(11)?,
      enrichment_status: row.get(12)?,
      active:            row.get(13)?,
      created_at:        row.get(14)?,
    })
  }

  pub fn into_animal(self) -> Result<Animal> {
    Ok(Animal {
      animal_id:         self.animal_id.into(),
      name:              self.name,
      cage_id:           self.cage_id,
      sex:               decode_sex(&self.sex)?,
      age:               self.age,
      weight_kg:         self.weight_kg,
      matriline:         self.matriline,
      rank:              Rank {
        value:      self.rank_value,
        origin:     decode_origin(&self.rank_origin)?,
        updated_at: decode_dt(&self.rank_updated_at)?,
      },
      rank_version:      decode_count("rank_version", self.rank_version)?,
      welfare_flag:      self.welfare_flag.as_deref().map(decode_flag).transpose()?,
      enrichment_status: self.enrichment_status,
      active:            self.active,
      created_at:        decode_dt(&self.created_at)?,
    })
  }
}

pub const BEHAVIOR_COLUMNS: &str = "event_id, actor_id, target_id, behavior, intensity,
   reason, observer, session_id, observed_at, recorded_at";

pub struct RawBehavior {
  pub event_id:    String,
  pub actor_id:    String,
  pub target_id:   Option<String>,
  pub behavior:    String,
  pub intensity:   u8,
  pub reason:      Option<String>,
  pub observer:    Option<String>,
  pub session_id:  Option<String>,
  pub observed_at: String,
  pub recorded_at: String,
}

impl RawBehavior {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:    row.get(0)?,
      actor_id:    row.get(1)?,
      target_id:   row.get(2)?,
      behavior:    row.get(3)?,
      intensity:   row.get(4)?,
      reason:      row.get(5)?,
      observer:    row.get(6)?,
      session_id:  row.get(7)?,
      observed_at: row.get(8)?,
      recorded_at: row.get(9)?,
    })
  }

  pub fn into_event(self) -> Result<BehaviorEvent> {
    Ok(BehaviorEvent {
      event_id:    decode_uuid(&self.event_id)?,
      actor_id:    self.actor_id.into(),
      target_id:   self.target_id.map(Into::into),
      behavior:    decode_behavior(&self.behavior)?,
      intensity:   self.intensity,
      reason:      self.reason,
      observer:    self.observer,
      session_id:  self.session_id.as_deref().map(decode_uuid).transpose()?,
      observed_at: decode_dt(&self.observed_at)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

pub const STRESS_COLUMNS: &str =
  "log_id, animal_id, indicator, value, notes, observed_at, recorded_at";

pub struct RawStress {
  pub log_id:      String,
  pub animal_id:   String,
  pub indicator:   String,
  pub value:       f64,
  pub notes:       Option<String>,
  pub observed_at: String,
  pub recorded_at: String,
}

impl RawStress {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      log_id:      row.get(0)?,
      animal_id:   row.get(1)?,
      indicator:   row.get(2)?,
      value:       row.get(3)?,
      notes:       row.get(4)?,
      observed_at: row.get(5)?,
      recorded_at: row.get(6)?,
    })
  }

  pub fn into_log(self) -> Result<StressLog> {
    Ok(StressLog {
      log_id:      decode_uuid(&self.log_id)?,
      animal_id:   self.animal_id.into(),
      indicator:   self.indicator,
      value:       self.value,
      notes:       self.notes,
      observed_at: decode_dt(&self.observed_at)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

pub const ENRICHMENT_COLUMNS: &str = "log_id, animal_id, item, duration_minutes, frequency,
   outcome, observed_at, recorded_at";

pub struct RawEnrichment {
  pub log_id:           String,
  pub animal_id:        String,
  pub item:             String,
  pub duration_minutes: Option<f64>,
  pub frequency:        u32,
  pub outcome:          String,
  pub observed_at:      String,
  pub recorded_at:      String,
}

impl RawEnrichment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      log_id:           row.get(0)?,
      animal_id:        row.get(1)?,
      item:             row.get(2)?,
      duration_minutes: row.get(3)?,
      frequency:        row.get(4)?,
      outcome:          row.get(5)?,
      observed_at:      row.get(6)?,
      recorded_at:      row.get(7)?,
    })
  }

  pub fn into_log(self) -> Result<EnrichmentLog> {
    Ok(EnrichmentLog {
      log_id:           decode_uuid(&self.log_id)?,
      animal_id:        self.animal_id.into(),
      item:             self.item,
      duration_minutes: self.duration_minutes,
      frequency:        self.frequency,
      outcome:          decode_outcome(&self.outcome)?,
      observed_at:      decode_dt(&self.observed_at)?,
      recorded_at:      decode_dt(&self.recorded_at)?,
    })
  }
}

pub const INCIDENT_COLUMNS: &str = "incident_id, animal_id, session_id, reason, description,
   attachment_url, media_type, tags, observed_at, recorded_at";

pub struct RawIncident {
  pub incident_id:    String,
  pub animal_id:      Option<String>,
  pub session_id:     Option<String>,
  pub reason:         String,
  pub description:    Option<String>,
  pub attachment_url: Option<String>,
  pub media_type:     Option<String>,
  pub tags:           String,
  pub observed_at:    String,
  pub recorded_at:    String,
}

impl RawIncident {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      incident_id:    row.get(0)?,
      animal_id:      row.get(1)?,
      session_id:     row.get(2)?,
      reason:         row.get(3)?,
      description:    row.get(4)?,
      attachment_url: row.get(5)?,
      media_type:     row.get(6)?,
      tags:           row.get(7)?,
      observed_at:    row.get(8)?,
      recorded_at:    row.get(9)?,
    })
  }

  pub fn into_incident(self) -> Result<Incident> {
    Ok(Incident {
      incident_id:    decode_uuid(&self.incident_id)?,
      animal_id:      self.animal_id.map(Into::into),
      session_id:     self.session_id.as_deref().map(decode_uuid).transpose()?,
      reason:         self.reason,
      description:    self.description,
      attachment_url: self.attachment_url,
      media_type:     self.media_type,
      tags:           decode_tags(&self.tags),
      observed_at:    decode_dt(&self.observed_at)?,
      recorded_at:    decode_dt(&self.recorded_at)?,
    })
  }
}

pub const SESSION_COLUMNS: &str =
  "session_id, name, mode, observer, cage_id, reason, notes, started_at, ended_at";

pub struct RawSession {
  pub session_id: String,
  pub name:       Option<String>,
  pub mode:       String,
  pub observer:   Option<String>,
  pub cage_id:    Option<String>,
  pub reason:     Option<String>,
  pub notes:      Option<String>,
  pub started_at: String,
  pub ended_at:   Option<String>,
}

impl RawSession {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      session_id: row.get(0)?,
      name:       row.get(1)?,
      mode:       row.get(2)?,
      observer:   row.get(3)?,
      cage_id:    row.get(4)?,
      reason:     row.get(5)?,
      notes:      row.get(6)?,
      started_at: row.get(7)?,
      ended_at:   row.get(8)?,
    })
  }

  pub fn into_session(self) -> Result<ObservationSession> {
    Ok(ObservationSession {
      session_id: decode_uuid(&self.session_id)?,
      name:       self.name,
      mode:       decode_mode(&self.mode)?,
      observer:   self.observer,
      cage_id:    self.cage_id,
      reason:     self.reason,
      notes:      self.notes,
      started_at: decode_dt(&self.started_at)?,
      ended_at:   self.ended_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw values read from the single `rank_cache` row.
pub struct RawRankCache {
  pub stale:           bool,
  pub applied_through: Option<String>,
  pub generation:      i64,
}

impl RawRankCache {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      stale:           row.get(0)?,
      applied_through: row.get(1)?,
      generation:      row.get(2)?,
    })
  }

  pub fn into_state(self) -> Result<RankCacheState> {
    Ok(RankCacheState {
      stale:           self.stale,
      applied_through: self.applied_through.as_deref().map(decode_dt).transpose()?,
      generation:      decode_count("generation", self.generation)?,
    })
  }
}
