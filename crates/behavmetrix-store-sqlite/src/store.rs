//! [`SqliteStore`], the SQLite implementation of [`ColonyStore`].

use std::path::Path;

use behavmetrix_core::{
  alert::WelfareFlag,
  animal::{Animal, AnimalId, AnimalPatch, NewAnimal},
  ethogram::BehaviorKind,
  log::{
    BehaviorEvent, EnrichmentLog, Incident, NewBehaviorEvent,
    NewEnrichmentLog, NewIncident, NewStressLog, StressLog,
  },
  session::{NewSession, ObservationSession},
  store::{
    AnimalQuery, ColonyStore, CommitOutcome, LogQuery, RankCacheState,
    RankCommit,
  },
};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use strum::IntoEnumIterator as _;
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    ANIMAL_COLUMNS, BEHAVIOR_COLUMNS, ENRICHMENT_COLUMNS, INCIDENT_COLUMNS,
    RawAnimal, RawBehavior, RawEnrichment, RawIncident, RawRankCache,
    RawSession, RawStress, SESSION_COLUMNS, STRESS_COLUMNS, encode_count,
    encode_dt, encode_origin, encode_outcome, encode_sex, encode_tags,
    encode_uuid, stamp,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A BehavMetrix colony store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

fn select_animal(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<Option<RawAnimal>> {
  conn
    .query_row(
      &format!("SELECT {ANIMAL_COLUMNS} FROM animals WHERE animal_id = ?1"),
      rusqlite::params![id],
      RawAnimal::from_row,
    )
    .optional()
}

fn select_rank_cache(conn: &rusqlite::Connection) -> rusqlite::Result<RawRankCache> {
  conn.query_row(
    "SELECT stale, applied_through, generation FROM rank_cache WHERE id = 1",
    [],
    RawRankCache::from_row,
  )
}

fn select_session(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<Option<RawSession>> {
  conn
    .query_row(
      &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
      rusqlite::params![id],
      RawSession::from_row,
    )
    .optional()
}

fn new_behavior(input: NewBehaviorEvent, recorded_at: DateTime<Utc>) -> BehaviorEvent {
  BehaviorEvent {
    event_id: Uuid::new_v4(),
    actor_id: input.actor_id,
    target_id: input.target_id,
    behavior: input.behavior,
    intensity: input.intensity,
    reason: input.reason,
    observer: input.observer,
    session_id: input.session_id,
    observed_at: stamp(input.observed_at.unwrap_or(recorded_at)),
    recorded_at,
  }
}

fn insert_behavior(conn: &rusqlite::Connection, event: &BehaviorEvent) -> rusqlite::Result<()> {
  let behavior: &'static str = event.behavior.into();
  conn.execute(
    "INSERT INTO behavior_events (
       event_id, actor_id, target_id, behavior, intensity,
       reason, observer, session_id, observed_at, recorded_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    rusqlite::params![
      encode_uuid(event.event_id),
      event.actor_id.as_str(),
      event.target_id.as_ref().map(AnimalId::as_str),
      behavior,
      event.intensity,
      event.reason,
      event.observer,
      event.session_id.map(encode_uuid),
      encode_dt(event.observed_at),
      encode_dt(event.recorded_at),
    ],
  )?;
  Ok(())
}

/// Bind values shared by the log readers: animal, lower bound, limit.
/// SQLite treats a negative `LIMIT` as unbounded.
fn log_params(query: &LogQuery) -> Result<(Option<String>, Option<String>, i64)> {
  let limit = match query.limit {
    Some(n) => encode_count(n as u64)?,
    None => -1,
  };
  Ok((
    query.animal_id.as_ref().map(|id| id.as_str().to_owned()),
    query.since.map(encode_dt),
    limit,
  ))
}

/// `IN` list of every dominance-relevant behavior name.
fn dominance_behaviors() -> String {
  BehaviorKind::iter()
    .filter(|kind| kind.dominance_outcome().is_some())
    .map(|kind| format!("'{kind}'"))
    .collect::<Vec<_>>()
    .join(", ")
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, used by the tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert `animal`, or refresh its roster columns when `upsert` is set.
  /// Returns the stored row, or `None` when a plain insert hit an existing id.
  async fn write_animal(&self, animal: Animal, upsert: bool) -> Result<Option<Animal>> {
    let id = animal.animal_id.as_str().to_owned();
    let sex = encode_sex(animal.sex);
    let origin = encode_origin(animal.rank.origin);
    let rank_at = encode_dt(animal.rank.updated_at);
    let created_at = encode_dt(animal.created_at);
    let conflict = if upsert {
      "ON CONFLICT (animal_id) DO UPDATE SET
         name              = excluded.name,
         cage_id           = excluded.cage_id,
         sex               = excluded.sex,
         age               = excluded.age,
         weight_kg         = excluded.weight_kg,
         matriline         = excluded.matriline,
         enrichment_status = excluded.enrichment_status"
    } else {
      "ON CONFLICT (animal_id) DO NOTHING"
    };

    let raw: Option<RawAnimal> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          &format!(
            "INSERT INTO animals (
               animal_id, name, cage_id, sex, age, weight_kg, matriline,
               rank_value, rank_origin, rank_updated_at, rank_version,
               welfare_flag, enrichment_status, active, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, NULL, ?11, 1, ?12)
             {conflict}"
          ),
          rusqlite::params![
            id,
            animal.name,
            animal.cage_id,
            sex,
            animal.age,
            animal.weight_kg,
            animal.matriline,
            animal.rank.value,
            origin,
            rank_at,
            animal.enrichment_status,
            created_at,
          ],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_animal(conn, &id)?)
      })
      .await?;

    raw.map(RawAnimal::into_animal).transpose()
  }

  async fn read_cache(&self) -> Result<RankCacheState> {
    self
      .conn
      .call(|conn| Ok(select_rank_cache(conn)?))
      .await?
      .into_state()
  }
}

// ─── ColonyStore impl ────────────────────────────────────────────────────────

impl ColonyStore for SqliteStore {
  type Error = Error;

  // ── Animals ───────────────────────────────────────────────────────────────

  async fn add_animal(&self, input: NewAnimal, initial_rating: f64) -> Result<Animal> {
    let id = input.animal_id.clone();
    let animal = input.into_animal(initial_rating, stamp(Utc::now()));
    self
      .write_animal(animal, false)
      .await?
      .ok_or(Error::DuplicateAnimal(id))
  }

  async fn upsert_animal(&self, input: NewAnimal, initial_rating: f64) -> Result<Animal> {
    let id = input.animal_id.clone();
    let animal = input.into_animal(initial_rating, stamp(Utc::now()));
    // An upsert always touches a row, so `None` cannot happen here.
    self
      .write_animal(animal, true)
      .await?
      .ok_or(Error::DuplicateAnimal(id))
  }

  async fn update_animal(&self, id: AnimalId, patch: AnimalPatch) -> Result<Option<Animal>> {
    let sex = patch.sex.map(encode_sex);
    let raw = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE animals
           SET name              = coalesce(?1, name),
               cage_id           = coalesce(?2, cage_id),
               sex               = coalesce(?3, sex),
               age               = coalesce(?4, age),
               weight_kg         = coalesce(?5, weight_kg),
               matriline         = coalesce(?6, matriline),
               enrichment_status = coalesce(?7, enrichment_status)
           WHERE animal_id = ?8",
          rusqlite::params![
            patch.name,
            patch.cage_id,
            sex,
            patch.age,
            patch.weight_kg,
            patch.matriline,
            patch.enrichment_status,
            id.as_str(),
          ],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_animal(conn, id.as_str())?)
      })
      .await?;
    raw.map(RawAnimal::into_animal).transpose()
  }

  async fn get_animal(&self, id: AnimalId) -> Result<Option<Animal>> {
    let raw = self
      .conn
      .call(move |conn| Ok(select_animal(conn, id.as_str())?))
      .await?;
    raw.map(RawAnimal::into_animal).transpose()
  }

  async fn list_animals(&self, query: AnimalQuery) -> Result<Vec<Animal>> {
    let cage = query.cage;
    let sex = query.sex.map(encode_sex);
    let search = query
      .search
      .map(|s| s.trim().to_lowercase())
      .filter(|s| !s.is_empty())
      .map(|s| format!("%{s}%"));
    let include_inactive = query.include_inactive;

    let raws: Vec<RawAnimal> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ANIMAL_COLUMNS} FROM animals
           WHERE (?1 IS NULL OR cage_id = ?1)
             AND (?2 IS NULL OR sex = ?2)
             AND (?3 IS NULL
                  OR lower(animal_id) LIKE ?3
                  OR lower(coalesce(name, '')) LIKE ?3
                  OR lower(coalesce(matriline, '')) LIKE ?3)
             AND (?4 OR active = 1)
           ORDER BY animal_id"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![cage, sex, search, include_inactive],
            RawAnimal::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAnimal::into_animal).collect()
  }

  async fn set_active(&self, id: AnimalId, active: bool) -> Result<Option<Animal>> {
    let raw = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE animals SET active = ?1 WHERE animal_id = ?2",
          rusqlite::params![active, id.as_str()],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_animal(conn, id.as_str())?)
      })
      .await?;
    raw.map(RawAnimal::into_animal).transpose()
  }

  async fn set_welfare_flag(&self, id: AnimalId, flag: WelfareFlag) -> Result<bool> {
    let flag = flag.to_string();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE animals SET welfare_flag = ?1 WHERE animal_id = ?2",
          rusqlite::params![flag, id.as_str()],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Logs: append-only writes ──────────────────────────────────────────────

  async fn record_behavior(&self, input: NewBehaviorEvent) -> Result<BehaviorEvent> {
    let event = new_behavior(input, stamp(Utc::now()));
    let row = event.clone();
    self
      .conn
      .call(move |conn| Ok(insert_behavior(conn, &row)?))
      .await?;
    Ok(event)
  }

  async fn record_behaviors(&self, inputs: Vec<NewBehaviorEvent>) -> Result<Vec<BehaviorEvent>> {
    let recorded_at = stamp(Utc::now());
    let events: Vec<BehaviorEvent> = inputs
      .into_iter()
      .map(|input| new_behavior(input, recorded_at))
      .collect();
    let rows = events.clone();

    // Any failed insert returns early and the dropped transaction rolls back.
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for event in &rows {
          insert_behavior(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    debug!(count = events.len(), "behavior batch appended");
    Ok(events)
  }

  async fn record_stress(&self, input: NewStressLog) -> Result<StressLog> {
    let recorded_at = stamp(Utc::now());
    let log = StressLog {
      log_id: Uuid::new_v4(),
      animal_id: input.animal_id,
      indicator: input.indicator,
      value: input.value,
      notes: input.notes,
      observed_at: stamp(input.observed_at.unwrap_or(recorded_at)),
      recorded_at,
    };

    let id_str = encode_uuid(log.log_id);
    let animal = log.animal_id.as_str().to_owned();
    let indicator = log.indicator.clone();
    let value = log.value;
    let notes = log.notes.clone();
    let observed_at = encode_dt(log.observed_at);
    let recorded_at = encode_dt(log.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO stress_logs (
             log_id, animal_id, indicator, value, notes, observed_at, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str,
            animal,
            indicator,
            value,
            notes,
            observed_at,
            recorded_at
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(log)
  }

  async fn record_enrichment(&self, input: NewEnrichmentLog) -> Result<EnrichmentLog> {
    let recorded_at = stamp(Utc::now());
    let log = EnrichmentLog {
      log_id: Uuid::new_v4(),
      animal_id: input.animal_id,
      item: input.item,
      duration_minutes: input.duration_minutes,
      frequency: input.frequency,
      outcome: input.outcome,
      observed_at: stamp(input.observed_at.unwrap_or(recorded_at)),
      recorded_at,
    };

    let id_str = encode_uuid(log.log_id);
    let animal = log.animal_id.as_str().to_owned();
    let item = log.item.clone();
    let minutes = log.duration_minutes;
    let frequency = log.frequency;
    let outcome = encode_outcome(log.outcome);
    let observed_at = encode_dt(log.observed_at);
    let recorded_at = encode_dt(log.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO enrichment_logs (
             log_id, animal_id, item, duration_minutes, frequency,
             outcome, observed_at, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str,
            animal,
            item,
            minutes,
            frequency,
            outcome,
            observed_at,
            recorded_at
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(log)
  }

  async fn record_incident(&self, input: NewIncident) -> Result<Incident> {
    let recorded_at = stamp(Utc::now());
    let incident = Incident {
      incident_id: Uuid::new_v4(),
      animal_id: input.animal_id,
      session_id: input.session_id,
      reason: input.reason,
      description: input.description,
      attachment_url: input.attachment_url,
      media_type: input.media_type,
      tags: input.tags,
      observed_at: stamp(input.observed_at.unwrap_or(recorded_at)),
      recorded_at,
    };

    let id_str = encode_uuid(incident.incident_id);
    let animal = incident.animal_id.as_ref().map(|a| a.as_str().to_owned());
    let session = incident.session_id.map(encode_uuid);
    let reason = incident.reason.clone();
    let description = incident.description.clone();
    let attachment = incident.attachment_url.clone();
    let media_type = incident.media_type.clone();
    let tags = encode_tags(&incident.tags);
    let observed_at = encode_dt(incident.observed_at);
    let recorded_at = encode_dt(incident.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO incidents (
             incident_id, animal_id, session_id, reason, description,
             attachment_url, media_type, tags, observed_at, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            id_str,
            animal,
            session,
            reason,
            description,
            attachment,
            media_type,
            tags,
            observed_at,
            recorded_at
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(incident)
  }

  // ── Log reads ─────────────────────────────────────────────────────────────

  async fn behavior_events(&self, query: LogQuery) -> Result<Vec<BehaviorEvent>> {
    let (animal, since, limit) = log_params(&query)?;

    // Newest first so LIMIT keeps the most recent; reversed below.
    let raws: Vec<RawBehavior> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {BEHAVIOR_COLUMNS} FROM behavior_events
           WHERE (?1 IS NULL OR actor_id = ?1 OR target_id = ?1)
             AND (?2 IS NULL OR observed_at >= ?2)
           ORDER BY observed_at DESC, recorded_at DESC, event_id DESC
           LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![animal, since, limit], RawBehavior::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().rev().map(RawBehavior::into_event).collect()
  }

  async fn dominance_events(&self) -> Result<Vec<BehaviorEvent>> {
    let sql = format!(
      "SELECT {BEHAVIOR_COLUMNS} FROM behavior_events
       WHERE target_id IS NOT NULL
         AND behavior IN ({})
       ORDER BY observed_at, recorded_at, event_id",
      dominance_behaviors()
    );

    let raws: Vec<RawBehavior> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawBehavior::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawBehavior::into_event).collect()
  }

  async fn stress_logs(&self, query: LogQuery) -> Result<Vec<StressLog>> {
    let (animal, since, limit) = log_params(&query)?;

    let raws: Vec<RawStress> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {STRESS_COLUMNS} FROM stress_logs
           WHERE (?1 IS NULL OR animal_id = ?1)
             AND (?2 IS NULL OR observed_at >= ?2)
           ORDER BY observed_at DESC, recorded_at DESC, log_id DESC
           LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![animal, since, limit], RawStress::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().rev().map(RawStress::into_log).collect()
  }

  async fn enrichment_logs(&self, query: LogQuery) -> Result<Vec<EnrichmentLog>> {
    let (animal, since, limit) = log_params(&query)?;

    let raws: Vec<RawEnrichment> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ENRICHMENT_COLUMNS} FROM enrichment_logs
           WHERE (?1 IS NULL OR animal_id = ?1)
             AND (?2 IS NULL OR observed_at >= ?2)
           ORDER BY observed_at DESC, recorded_at DESC, log_id DESC
           LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![animal, since, limit], RawEnrichment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().rev().map(RawEnrichment::into_log).collect()
  }

  async fn incidents(&self, query: LogQuery) -> Result<Vec<Incident>> {
    let (animal, since, limit) = log_params(&query)?;

    let raws: Vec<RawIncident> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {INCIDENT_COLUMNS} FROM incidents
           WHERE (?1 IS NULL OR animal_id = ?1)
             AND (?2 IS NULL OR observed_at >= ?2)
           ORDER BY observed_at DESC, recorded_at DESC, incident_id DESC
           LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![animal, since, limit], RawIncident::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().rev().map(RawIncident::into_incident).collect()
  }

  // ── Sessions ──────────────────────────────────────────────────────────────

  async fn open_session(&self, input: NewSession) -> Result<ObservationSession> {
    let session = ObservationSession {
      session_id: Uuid::new_v4(),
      name:       input.name,
      mode:       input.mode,
      observer:   input.observer,
      cage_id:    input.cage_id,
      reason:     input.reason,
      notes:      input.notes,
      started_at: stamp(input.started_at.unwrap_or_else(Utc::now)),
      ended_at:   None,
    };

    let id_str = encode_uuid(session.session_id);
    let name = session.name.clone();
    let mode: &'static str = session.mode.into();
    let observer = session.observer.clone();
    let cage = session.cage_id.clone();
    let reason = session.reason.clone();
    let notes = session.notes.clone();
    let started_at = encode_dt(session.started_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sessions (
             session_id, name, mode, observer, cage_id, reason, notes, started_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![id_str, name, mode, observer, cage, reason, notes, started_at],
        )?;
        Ok(())
      })
      .await?;

    debug!(session = %session.session_id, "observation session opened");
    Ok(session)
  }

  async fn close_session(
    &self,
    id: Uuid,
    ended_at: DateTime<Utc>,
    notes: Option<String>,
  ) -> Result<Option<ObservationSession>> {
    let id_str = encode_uuid(id);
    let ended_at = encode_dt(stamp(ended_at));
    let raw = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE sessions
           SET ended_at = ?1, notes = coalesce(?2, notes)
           WHERE session_id = ?3 AND ended_at IS NULL",
          rusqlite::params![ended_at, notes, id_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_session(conn, &id_str)?)
      })
      .await?;
    raw.map(RawSession::into_session).transpose()
  }

  async fn get_session(&self, id: Uuid) -> Result<Option<ObservationSession>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| Ok(select_session(conn, &id_str)?))
      .await?;
    raw.map(RawSession::into_session).transpose()
  }

  async fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<ObservationSession>> {
    let limit = match limit {
      Some(n) => encode_count(n as u64)?,
      None => -1,
    };
    let raws: Vec<RawSession> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SESSION_COLUMNS} FROM sessions
           ORDER BY started_at DESC, session_id DESC
           LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit], RawSession::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().rev().map(RawSession::into_session).collect()
  }

  async fn session_events(&self, id: Uuid) -> Result<Vec<BehaviorEvent>> {
    let id_str = encode_uuid(id);
    let raws: Vec<RawBehavior> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {BEHAVIOR_COLUMNS} FROM behavior_events
           WHERE session_id = ?1
           ORDER BY observed_at, recorded_at, event_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawBehavior::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawBehavior::into_event).collect()
  }

  // ── Rank cache ────────────────────────────────────────────────────────────

  async fn rank_cache(&self) -> Result<RankCacheState> { self.read_cache().await }

  async fn mark_ranks_stale(&self) -> Result<RankCacheState> {
    let raw = self
      .conn
      .call(|conn| {
        conn.execute(
          "UPDATE rank_cache SET stale = 1, generation = generation + 1 WHERE id = 1",
          [],
        )?;
        Ok(select_rank_cache(conn)?)
      })
      .await?;
    let state = raw.into_state()?;
    debug!(generation = state.generation, "rank cache marked stale");
    Ok(state)
  }

  async fn commit_ranks(&self, commit: RankCommit) -> Result<CommitOutcome> {
    let expected_generation = encode_count(commit.expected_generation)?;
    let updates = commit
      .updates
      .iter()
      .map(|u| {
        Ok((
          u.animal_id.as_str().to_owned(),
          encode_count(u.expected_version)?,
          u.rank.value,
          encode_origin(u.rank.origin),
          encode_dt(u.rank.updated_at),
        ))
      })
      .collect::<Result<Vec<_>>>()?;
    let stale = commit.stale;
    let applied_through = commit.applied_through.map(encode_dt);

    // `None` means a guard failed; dropping the transaction rolls it back.
    let written: Option<Vec<RawAnimal>> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let generation: i64 = tx.query_row(
          "SELECT generation FROM rank_cache WHERE id = 1",
          [],
          |row| row.get(0),
        )?;
        if generation != expected_generation {
          return Ok(None);
        }

        for (id, version, value, origin, updated_at) in &updates {
          let changed = tx.execute(
            "UPDATE animals
             SET rank_value      = ?1,
                 rank_origin     = ?2,
                 rank_updated_at = ?3,
                 rank_version    = rank_version + 1
             WHERE animal_id = ?4 AND rank_version = ?5",
            rusqlite::params![value, origin, updated_at, id, version],
          )?;
          if changed == 0 {
            return Ok(None);
          }
        }

        tx.execute(
          "UPDATE rank_cache
           SET stale = ?1, applied_through = ?2, generation = generation + 1
           WHERE id = 1",
          rusqlite::params![stale, applied_through],
        )?;

        let mut written = Vec::with_capacity(updates.len());
        for (id, ..) in &updates {
          written.push(tx.query_row(
            &format!("SELECT {ANIMAL_COLUMNS} FROM animals WHERE animal_id = ?1"),
            rusqlite::params![id],
            RawAnimal::from_row,
          )?);
        }

        tx.commit()?;
        Ok(Some(written))
      })
      .await?;

    match written {
      None => {
        debug!("rank commit rejected by version guard");
        Ok(CommitOutcome::Conflict)
      }
      Some(raws) => Ok(CommitOutcome::Applied(
        raws
          .into_iter()
          .map(RawAnimal::into_animal)
          .collect::<Result<_>>()?,
      )),
    }
  }
}
