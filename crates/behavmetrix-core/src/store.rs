//! The `ColonyStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `behavmetrix-store-sqlite`). The service layer and the HTTP API depend on
//! this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  alert::WelfareFlag,
  animal::{Animal, AnimalId, AnimalPatch, NewAnimal, Rank, Sex},
  log::{
    BehaviorEvent, EnrichmentLog, Incident, NewBehaviorEvent,
    NewEnrichmentLog, NewIncident, NewStressLog, StressLog,
  },
  session::{NewSession, ObservationSession},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`ColonyStore::list_animals`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnimalQuery {
  pub cage:             Option<String>,
  pub sex:              Option<Sex>,
  /// Case-insensitive substring over id, name and matriline.
  pub search:           Option<String>,
  #[serde(default)]
  pub include_inactive: bool,
}

/// Parameters for the log readers. Results are always oldest-first.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
  /// For behavior events, matches either actor or target.
  pub animal_id: Option<AnimalId>,
  pub since:     Option<DateTime<Utc>>,
  /// Keep only the most recent `limit` entries.
  pub limit:     Option<usize>,
}

impl LogQuery {
  pub fn for_animal(animal_id: AnimalId, since: Option<DateTime<Utc>>) -> Self {
    Self { animal_id: Some(animal_id), since, limit: None }
  }
}

// ─── Rank cache ──────────────────────────────────────────────────────────────

/// Whether the ranks cached on animal rows reflect the interaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RankCacheState {
  /// Set when a log write could not be applied incrementally.
  pub stale:           bool,
  /// Observation time of the latest contest folded into the cache.
  pub applied_through: Option<DateTime<Utc>>,
  /// Bumped on every cache write; guards against lost stale marks.
  pub generation:      u64,
}

/// One animal's new rank, valid only if its `rank_version` is still
/// `expected_version`.
#[derive(Debug, Clone)]
pub struct RankUpdate {
  pub animal_id:        AnimalId,
  pub expected_version: u64,
  pub rank:             Rank,
}

/// An atomic rank write: every update plus the new cache state, or nothing.
#[derive(Debug, Clone)]
pub struct RankCommit {
  pub updates:             Vec<RankUpdate>,
  pub expected_generation: u64,
  pub stale:               bool,
  pub applied_through:     Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
  /// The animals as written, in update order.
  Applied(Vec<Animal>),
  /// A version or generation check failed; nothing was written.
  Conflict,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a colony store backend.
///
/// The observation logs are append-only. Animal rows are mutated only
/// through roster upserts and patches, activation changes, flag writes and
/// guarded rank commits. Sessions change once, when they are closed.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait ColonyStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Animals ───────────────────────────────────────────────────────────

  /// Insert a new animal rated `initial_rating`. Fails if the id is already
  /// taken.
  fn add_animal(
    &self,
    input: NewAnimal,
    initial_rating: f64,
  ) -> impl Future<Output = Result<Animal, Self::Error>> + Send + '_;

  /// Insert, or refresh the roster fields of an existing animal. Rank, flag
  /// and activation are left alone on update.
  fn upsert_animal(
    &self,
    input: NewAnimal,
    initial_rating: f64,
  ) -> impl Future<Output = Result<Animal, Self::Error>> + Send + '_;

  /// Overwrite the roster fields set in `patch`. Returns `None` if not
  /// found.
  fn update_animal(
    &self,
    id: AnimalId,
    patch: AnimalPatch,
  ) -> impl Future<Output = Result<Option<Animal>, Self::Error>> + Send + '_;

  /// Retrieve an animal by id. Returns `None` if not found.
  fn get_animal(
    &self,
    id: AnimalId,
  ) -> impl Future<Output = Result<Option<Animal>, Self::Error>> + Send + '_;

  /// List animals ordered by id.
  fn list_animals(
    &self,
    query: AnimalQuery,
  ) -> impl Future<Output = Result<Vec<Animal>, Self::Error>> + Send + '_;

  /// Activate or deactivate an animal. Returns `None` if not found.
  fn set_active(
    &self,
    id: AnimalId,
    active: bool,
  ) -> impl Future<Output = Result<Option<Animal>, Self::Error>> + Send + '_;

  /// Store the latest welfare flag. Returns `false` if the animal is missing.
  fn set_welfare_flag(
    &self,
    id: AnimalId,
    flag: WelfareFlag,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Logs: append-only writes ──────────────────────────────────────────

  /// Append a behavior event. `recorded_at` is set by the store and
  /// `observed_at` defaults to it.
  fn record_behavior(
    &self,
    input: NewBehaviorEvent,
  ) -> impl Future<Output = Result<BehaviorEvent, Self::Error>> + Send + '_;

  /// Append every event in one transaction: all are stored or none are.
  /// Returned in input order.
  fn record_behaviors(
    &self,
    inputs: Vec<NewBehaviorEvent>,
  ) -> impl Future<Output = Result<Vec<BehaviorEvent>, Self::Error>> + Send + '_;

  fn record_stress(
    &self,
    input: NewStressLog,
  ) -> impl Future<Output = Result<StressLog, Self::Error>> + Send + '_;

  fn record_enrichment(
    &self,
    input: NewEnrichmentLog,
  ) -> impl Future<Output = Result<EnrichmentLog, Self::Error>> + Send + '_;

  fn record_incident(
    &self,
    input: NewIncident,
  ) -> impl Future<Output = Result<Incident, Self::Error>> + Send + '_;

  // ── Log reads ─────────────────────────────────────────────────────────

  fn behavior_events(
    &self,
    query: LogQuery,
  ) -> impl Future<Output = Result<Vec<BehaviorEvent>, Self::Error>> + Send + '_;

  /// Every dyadic, dominance-relevant behavior event in replay order.
  fn dominance_events(
    &self,
  ) -> impl Future<Output = Result<Vec<BehaviorEvent>, Self::Error>> + Send + '_;

  fn stress_logs(
    &self,
    query: LogQuery,
  ) -> impl Future<Output = Result<Vec<StressLog>, Self::Error>> + Send + '_;

  fn enrichment_logs(
    &self,
    query: LogQuery,
  ) -> impl Future<Output = Result<Vec<EnrichmentLog>, Self::Error>> + Send + '_;

  fn incidents(
    &self,
    query: LogQuery,
  ) -> impl Future<Output = Result<Vec<Incident>, Self::Error>> + Send + '_;

  // ── Sessions ──────────────────────────────────────────────────────────

  /// `started_at` defaults to the recording time.
  fn open_session(
    &self,
    input: NewSession,
  ) -> impl Future<Output = Result<ObservationSession, Self::Error>> + Send + '_;

  /// Set `ended_at` (and `notes`, when given) on an open session. Returns
  /// `None` if the session is missing or already closed.
  fn close_session(
    &self,
    id: Uuid,
    ended_at: DateTime<Utc>,
    notes: Option<String>,
  ) -> impl Future<Output = Result<Option<ObservationSession>, Self::Error>> + Send + '_;

  fn get_session(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ObservationSession>, Self::Error>> + Send + '_;

  /// The most recent `limit` sessions by start time, oldest first.
  fn list_sessions(
    &self,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<ObservationSession>, Self::Error>> + Send + '_;

  /// Behavior events logged in a session, in replay order.
  fn session_events(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Vec<BehaviorEvent>, Self::Error>> + Send + '_;

  // ── Rank cache ────────────────────────────────────────────────────────

  fn rank_cache(
    &self,
  ) -> impl Future<Output = Result<RankCacheState, Self::Error>> + Send + '_;

  /// Flag the cached ranks as out of date. Unconditional.
  fn mark_ranks_stale(
    &self,
  ) -> impl Future<Output = Result<RankCacheState, Self::Error>> + Send + '_;

  /// Apply `commit` atomically under its version and generation guards.
  fn commit_ranks(
    &self,
    commit: RankCommit,
  ) -> impl Future<Output = Result<CommitOutcome, Self::Error>> + Send + '_;
}
