//! `WelfareService` runs the rank and alert engines against a
//! [`ColonyStore`] and writes their results back onto animal records.
//!
//! Every behavior write keeps the rank cache consistent: a dominance contest
//! between two computed ranks, newer than anything already folded in, is
//! applied incrementally under the optimistic guard. Anything else marks the
//! cache stale and the next rank read recomputes from the log.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  alert::{
    AlertEvaluation, AlertMessage, WelfareFlag, WindowLogs, evaluate_alerts,
    resolve_flag,
  },
  animal::{Animal, AnimalId, AnimalPatch, NewAnimal, Rank},
  config::EngineConfig,
  error::{Error, Result, ValidationError},
  ethogram::Outcome,
  log::{
    BehaviorEvent, Contest, EnrichmentLog, Incident, NewBehaviorEvent,
    NewEnrichmentLog, NewIncident, NewStressLog, StressLog, StressSigns,
  },
  rank::{
    self, OverridePolicy, RatingPair, RatingPoint, apply_rank_update,
    merge_recomputed, rating_trajectory,
  },
  session::{CloseSession, NewSession, ObservationSession, SessionDetail},
  stats::{
    AnimalSummary, DASHBOARD_WINDOW_DAYS, DashboardSummary, colony_stats,
    enrichment_summary,
  },
  store::{
    AnimalQuery, ColonyStore, CommitOutcome, LogQuery, RankCacheState,
    RankCommit, RankUpdate,
  },
};

/// Read-modify-write cycles attempted before a rank write gives up.
pub const MAX_RANK_ATTEMPTS: usize = 3;

/// One row of the rank table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
  pub animal_id: AnimalId,
  pub name:      Option<String>,
  #[serde(flatten)]
  pub rank:      Rank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColonyEvaluation {
  pub evaluated_at: DateTime<Utc>,
  pub evaluations:  Vec<AlertEvaluation>,
  /// Every instability message across the colony.
  pub messages:     Vec<AlertMessage>,
}

pub struct WelfareService<S> {
  store:  Arc<S>,
  config: EngineConfig,
}

impl<S: ColonyStore> WelfareService<S> {
  pub fn new(store: Arc<S>, config: EngineConfig) -> Self { Self { store, config } }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  // ── Lookups ───────────────────────────────────────────────────────────

  /// The animal named by a path or query; missing is a 404.
  pub async fn animal(&self, id: &AnimalId) -> Result<Animal> {
    self
      .store
      .get_animal(id.clone())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::AnimalNotFound(id.clone()))
  }

  /// An animal referenced from a request body; missing is a validation error.
  async fn known(&self, id: &AnimalId) -> Result<Animal> {
    self
      .store
      .get_animal(id.clone())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| ValidationError::UnknownAnimal(id.clone()).into())
  }

  async fn active(&self, id: &AnimalId) -> Result<Animal> {
    let animal = self.known(id).await?;
    if !animal.active {
      return Err(ValidationError::InactiveAnimal(id.clone()).into());
    }
    Ok(animal)
  }

  /// A session referenced from a request body; missing is a validation
  /// error.
  async fn known_session(&self, id: Uuid) -> Result<ObservationSession> {
    self
      .store
      .get_session(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| ValidationError::UnknownSession(id).into())
  }

  pub async fn animals(&self, query: AnimalQuery) -> Result<Vec<Animal>> {
    self.store.list_animals(query).await.map_err(Error::store)
  }

  pub async fn behaviors(&self, query: LogQuery) -> Result<Vec<BehaviorEvent>> {
    self.store.behavior_events(query).await.map_err(Error::store)
  }

  pub async fn stress_logs(&self, query: LogQuery) -> Result<Vec<StressLog>> {
    self.store.stress_logs(query).await.map_err(Error::store)
  }

  pub async fn enrichment_logs(&self, query: LogQuery) -> Result<Vec<EnrichmentLog>> {
    self.store.enrichment_logs(query).await.map_err(Error::store)
  }

  // ── Roster ────────────────────────────────────────────────────────────

  pub async fn add_animal(&self, input: NewAnimal) -> Result<Animal> {
    input.validate()?;
    if self
      .store
      .get_animal(input.animal_id.clone())
      .await
      .map_err(Error::store)?
      .is_some()
    {
      return Err(ValidationError::DuplicateAnimal(input.animal_id).into());
    }
    let animal = self
      .store
      .add_animal(input, self.config.elo.initial_rating)
      .await
      .map_err(Error::store)?;
    info!(animal_id = %animal.animal_id, "animal added");
    Ok(animal)
  }

  /// Validate every row, then upsert them in order. A row whose id already
  /// exists refreshes the roster fields and keeps its rank and flag.
  pub async fn import_roster(&self, rows: Vec<NewAnimal>) -> Result<Vec<Animal>> {
    let mut seen = BTreeSet::new();
    for row in &rows {
      row.validate()?;
      if !seen.insert(row.animal_id.clone()) {
        return Err(ValidationError::DuplicateAnimal(row.animal_id.clone()).into());
      }
    }

    let mut imported = Vec::with_capacity(rows.len());
    for row in rows {
      imported.push(
        self
          .store
          .upsert_animal(row, self.config.elo.initial_rating)
          .await
          .map_err(Error::store)?,
      );
    }
    info!(count = imported.len(), "roster imported");
    Ok(imported)
  }

  /// Edit roster fields. Rank, flag and activation are untouched.
  pub async fn update_animal(&self, id: &AnimalId, patch: AnimalPatch) -> Result<Animal> {
    patch.validate()?;
    let animal = self
      .store
      .update_animal(id.clone(), patch)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::AnimalNotFound(id.clone()))?;
    info!(animal_id = %id, "animal updated");
    Ok(animal)
  }

  pub async fn deactivate(&self, id: &AnimalId) -> Result<Animal> {
    let animal = self
      .store
      .set_active(id.clone(), false)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::AnimalNotFound(id.clone()))?;
    info!(animal_id = %id, "animal deactivated");
    Ok(animal)
  }

  // ── Observation logs ──────────────────────────────────────────────────

  async fn check_behavior(&self, input: &NewBehaviorEvent) -> Result<()> {
    input.validate()?;
    self.active(&input.actor_id).await?;
    if let Some(target) = &input.target_id {
      self.active(target).await?;
    }
    if let Some(id) = input.session_id
      && !self.known_session(id).await?.is_open()
    {
      return Err(ValidationError::SessionClosed(id).into());
    }
    Ok(())
  }

  /// Fold a stored event into the rank cache.
  async fn absorb_event(&self, event: &BehaviorEvent) -> Result<()> {
    debug!(
      event_id = %event.event_id,
      actor = %event.actor_id,
      behavior = %event.behavior,
      "behavior logged"
    );
    if let Some(contest) = event.contest()? {
      self.absorb_contest(&contest).await?;
    }
    Ok(())
  }

  pub async fn log_behavior(&self, input: NewBehaviorEvent) -> Result<BehaviorEvent> {
    self.check_behavior(&input).await?;
    let event = self.store.record_behavior(input).await.map_err(Error::store)?;
    self.absorb_event(&event).await?;
    Ok(event)
  }

  /// Validate the whole batch, then append it in one store transaction.
  /// Either every event is stored or none is.
  pub async fn log_behaviors(
    &self,
    batch: Vec<NewBehaviorEvent>,
  ) -> Result<Vec<BehaviorEvent>> {
    for input in &batch {
      self.check_behavior(input).await?;
    }
    let logged = self.store.record_behaviors(batch).await.map_err(Error::store)?;
    for event in &logged {
      self.absorb_event(event).await?;
    }
    info!(count = logged.len(), "behavior batch logged");
    Ok(logged)
  }

  pub async fn log_stress(&self, input: NewStressLog) -> Result<StressLog> {
    input.validate()?;
    self.active(&input.animal_id).await?;
    let log = self.store.record_stress(input).await.map_err(Error::store)?;
    debug!(animal_id = %log.animal_id, indicator = %log.indicator, value = log.value, "stress logged");
    Ok(log)
  }

  /// Score a sign checklist and store it as a composite reading.
  pub async fn log_stress_signs(&self, signs: StressSigns) -> Result<StressLog> {
    self.log_stress(signs.into_log()?).await
  }

  pub async fn log_enrichment(&self, input: NewEnrichmentLog) -> Result<EnrichmentLog> {
    input.validate()?;
    self.active(&input.animal_id).await?;
    let log = self.store.record_enrichment(input).await.map_err(Error::store)?;
    debug!(animal_id = %log.animal_id, item = %log.item, "enrichment logged");
    Ok(log)
  }

  pub async fn log_incident(&self, input: NewIncident) -> Result<Incident> {
    input.validate()?;
    if let Some(animal) = &input.animal_id {
      self.known(animal).await?;
    }
    if let Some(session) = input.session_id {
      self.known_session(session).await?;
    }
    let incident = self.store.record_incident(input).await.map_err(Error::store)?;
    info!(
      incident_id = %incident.incident_id,
      animal_id = ?incident.animal_id,
      reason = %incident.reason,
      "incident logged"
    );
    Ok(incident)
  }

  pub async fn incidents(&self, query: LogQuery) -> Result<Vec<Incident>> {
    self.store.incidents(query).await.map_err(Error::store)
  }

  // ── Sessions ──────────────────────────────────────────────────────────

  pub async fn open_session(&self, input: NewSession) -> Result<ObservationSession> {
    self.store.open_session(input).await.map_err(Error::store)
  }

  pub async fn close_session(&self, id: Uuid, input: CloseSession) -> Result<ObservationSession> {
    let session = self.session_record(id).await?;
    let ended_at = input.ended_at(&session, Utc::now())?;
    // `None` here means a concurrent close won.
    let closed = self
      .store
      .close_session(id, ended_at, input.notes)
      .await
      .map_err(Error::store)?
      .ok_or(ValidationError::SessionClosed(id))?;
    info!(session_id = %id, "observation session closed");
    Ok(closed)
  }

  async fn session_record(&self, id: Uuid) -> Result<ObservationSession> {
    self
      .store
      .get_session(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SessionNotFound(id))
  }

  /// A session with every behavior event logged in it.
  pub async fn session(&self, id: Uuid) -> Result<SessionDetail> {
    let session = self.session_record(id).await?;
    let events = self.store.session_events(id).await.map_err(Error::store)?;
    Ok(SessionDetail { session, events })
  }

  pub async fn sessions(&self, limit: Option<usize>) -> Result<Vec<ObservationSession>> {
    self.store.list_sessions(limit).await.map_err(Error::store)
  }

  // ── Rank cache ────────────────────────────────────────────────────────

  async fn cache(&self) -> Result<RankCacheState> {
    self.store.rank_cache().await.map_err(Error::store)
  }

  async fn mark_stale(&self) -> Result<()> {
    self.store.mark_ranks_stale().await.map_err(Error::store)?;
    Ok(())
  }

  async fn commit(&self, commit: RankCommit) -> Result<CommitOutcome> {
    self.store.commit_ranks(commit).await.map_err(Error::store)
  }

  /// Fold one freshly logged contest into the cached ranks.
  ///
  /// Contests at or before `applied_through` may already be part of the
  /// cache (a concurrent recompute can have read them), so they only mark
  /// it stale. If the guard keeps tripping the cache is marked stale too;
  /// the event itself is already stored.
  async fn absorb_contest(&self, contest: &Contest) -> Result<()> {
    for attempt in 1..=MAX_RANK_ATTEMPTS {
      let cache = self.cache().await?;
      if cache.stale {
        debug!("rank cache already stale, deferring to recompute");
        return Ok(());
      }
      if cache.applied_through.is_some_and(|through| contest.at <= through) {
        warn!(
          observed_at = %contest.at,
          "contest is not newer than the rank cache, marking ranks stale"
        );
        return self.mark_stale().await;
      }

      let winner = self.known(&contest.winner).await?;
      let loser = self.known(&contest.loser).await?;
      // A replay rates manually ranked animals from the log, not from their
      // pinned value, so only a replay can fold this contest in.
      if winner.rank.is_manual() || loser.rank.is_manual() {
        debug!(
          winner = %contest.winner,
          loser = %contest.loser,
          "contest involves a manual rank, marking ranks stale"
        );
        return self.mark_stale().await;
      }
      let next = apply_rank_update(
        RatingPair { actor: winner.rank.value, target: loser.rank.value },
        Outcome::ActorWins,
        self.config.elo.k_factor,
      );

      let now = Utc::now();
      let updates = [(&winner, next.actor), (&loser, next.target)]
        .into_iter()
        .map(|(animal, value)| RankUpdate {
          animal_id:        animal.animal_id.clone(),
          expected_version: animal.rank_version,
          rank:             Rank::computed(value, now),
        })
        .collect();

      let outcome = self
        .commit(RankCommit {
          updates,
          expected_generation: cache.generation,
          stale: false,
          applied_through: Some(contest.at),
        })
        .await?;
      match outcome {
        CommitOutcome::Applied(_) => {
          debug!(
            winner = %contest.winner,
            loser = %contest.loser,
            attempt,
            "incremental rank update applied"
          );
          return Ok(());
        }
        CommitOutcome::Conflict => {
          warn!(attempt, "incremental rank update conflicted, retrying");
        }
      }
    }

    warn!(
      attempts = MAX_RANK_ATTEMPTS,
      "incremental rank update kept conflicting, marking ranks stale"
    );
    self.mark_stale().await
  }

  /// Replay the whole dominance log and write the result onto every animal,
  /// merging manual ranks according to `policy`. Leaves the cache fresh.
  pub async fn recompute_ranks(&self, policy: OverridePolicy) -> Result<Vec<RankEntry>> {
    let elo = self.config.elo;
    for attempt in 1..=MAX_RANK_ATTEMPTS {
      let cache = self.cache().await?;
      let events = self.store.dominance_events().await.map_err(Error::store)?;
      let ratings = rank::recompute_ranks(&events, elo.initial_rating, elo.k_factor)?;
      let applied_through = events.iter().map(|e| e.observed_at).max();

      let animals = self
        .animals(AnimalQuery { include_inactive: true, ..Default::default() })
        .await?;
      let now = Utc::now();
      let updates: Vec<RankUpdate> = animals
        .iter()
        .filter_map(|animal| {
          let computed = ratings
            .get(&animal.animal_id)
            .copied()
            .unwrap_or(elo.initial_rating);
          merge_recomputed(&animal.rank, computed, policy, now).map(|rank| RankUpdate {
            animal_id: animal.animal_id.clone(),
            expected_version: animal.rank_version,
            rank,
          })
        })
        .collect();
      let changed = updates.len();

      let outcome = self
        .commit(RankCommit {
          updates,
          expected_generation: cache.generation,
          stale: false,
          applied_through,
        })
        .await?;
      match outcome {
        CommitOutcome::Applied(_) => {
          info!(contests = events.len(), changed, ?policy, attempt, "ranks recomputed");
          return self.rank_table().await;
        }
        CommitOutcome::Conflict => {
          warn!(attempt, "rank recompute conflicted, retrying");
        }
      }
    }
    Err(Error::ConcurrencyConflict { attempts: MAX_RANK_ATTEMPTS })
  }

  async fn refresh_ranks(&self) -> Result<()> {
    if self.cache().await?.stale {
      info!("rank cache is stale, recomputing");
      self.recompute_ranks(OverridePolicy::Preserve).await?;
    }
    Ok(())
  }

  async fn rank_table(&self) -> Result<Vec<RankEntry>> {
    let mut entries: Vec<RankEntry> = self
      .animals(AnimalQuery::default())
      .await?
      .into_iter()
      .map(|a| RankEntry { animal_id: a.animal_id, name: a.name, rank: a.rank })
      .collect();
    entries.sort_by(|a, b| {
      b.rank
        .value
        .total_cmp(&a.rank.value)
        .then_with(|| a.animal_id.cmp(&b.animal_id))
    });
    Ok(entries)
  }

  /// Current ranks of active animals, highest first. Recomputes first when
  /// the cache is stale.
  pub async fn ranks(&self) -> Result<Vec<RankEntry>> {
    self.refresh_ranks().await?;
    self.rank_table().await
  }

  /// Pin the given animals to manual ranks.
  pub async fn override_ranks(
    &self,
    overrides: BTreeMap<AnimalId, f64>,
  ) -> Result<Vec<Animal>> {
    if overrides.is_empty() {
      return Err(ValidationError::EmptyField { field: "overrides" }.into());
    }
    if let Some((id, value)) = overrides.iter().find(|(_, v)| !v.is_finite()) {
      return Err(
        ValidationError::InvalidValue {
          field:  "rank",
          reason: format!("{value} for {id} is not a finite number"),
        }
        .into(),
      );
    }

    for attempt in 1..=MAX_RANK_ATTEMPTS {
      let cache = self.cache().await?;
      let now = Utc::now();
      let mut updates = Vec::with_capacity(overrides.len());
      for (id, value) in &overrides {
        let animal = self.known(id).await?;
        updates.push(RankUpdate {
          animal_id:        animal.animal_id,
          expected_version: animal.rank_version,
          rank:             Rank::manual(*value, now),
        });
      }

      let outcome = self
        .commit(RankCommit {
          updates,
          expected_generation: cache.generation,
          stale: cache.stale,
          applied_through: cache.applied_through,
        })
        .await?;
      match outcome {
        CommitOutcome::Applied(animals) => {
          info!(count = animals.len(), "manual ranks set");
          return Ok(animals);
        }
        CommitOutcome::Conflict => {
          warn!(attempt, "rank override conflicted, retrying");
        }
      }
    }
    Err(Error::ConcurrencyConflict { attempts: MAX_RANK_ATTEMPTS })
  }

  /// Return an animal to computed ranking. Its value is rebuilt from the log
  /// on the next rank read.
  pub async fn clear_override(&self, id: &AnimalId) -> Result<Animal> {
    for attempt in 1..=MAX_RANK_ATTEMPTS {
      let cache = self.cache().await?;
      let animal = self.animal(id).await?;
      if !animal.rank.is_manual() {
        return Ok(animal);
      }

      let outcome = self
        .commit(RankCommit {
          updates:             vec![RankUpdate {
            animal_id:        animal.animal_id.clone(),
            expected_version: animal.rank_version,
            rank:             Rank::computed(animal.rank.value, Utc::now()),
          }],
          expected_generation: cache.generation,
          stale:               true,
          applied_through:     cache.applied_through,
        })
        .await?;
      match outcome {
        CommitOutcome::Applied(mut animals) => {
          info!(animal_id = %id, "manual rank released");
          return animals.pop().ok_or_else(|| Error::AnimalNotFound(id.clone()));
        }
        CommitOutcome::Conflict => {
          warn!(attempt, animal_id = %id, "override release conflicted, retrying");
        }
      }
    }
    Err(Error::ConcurrencyConflict { attempts: MAX_RANK_ATTEMPTS })
  }

  // ── Alerts ────────────────────────────────────────────────────────────

  async fn trajectories(&self) -> Result<rank::Trajectories> {
    let events = self.store.dominance_events().await.map_err(Error::store)?;
    let (_, trajectories) = rating_trajectory(&events, &self.config.elo)?;
    Ok(trajectories)
  }

  async fn evaluate(
    &self,
    animal: &Animal,
    ratings: Vec<RatingPoint>,
    now: DateTime<Utc>,
  ) -> Result<AlertEvaluation> {
    let thresholds = &self.config.alerts;
    let query = LogQuery::for_animal(animal.animal_id.clone(), thresholds.window.since(now));

    let logs = WindowLogs {
      stress: self.stress_logs(query.clone()).await?,
      behavior: self.behaviors(query.clone()).await?,
      enrichment: self.enrichment_logs(query).await?,
      ratings,
    }
    .trailing(&animal.animal_id, thresholds.window, now);
    let evaluation = evaluate_alerts(&animal.animal_id, &logs, thresholds);

    let stored = resolve_flag(animal.welfare_flag, evaluation.flag);
    if stored != animal.welfare_flag
      && let Some(flag) = stored
    {
      self
        .store
        .set_welfare_flag(animal.animal_id.clone(), flag)
        .await
        .map_err(Error::store)?;
      info!(
        animal_id = %animal.animal_id,
        %flag,
        previous = ?animal.welfare_flag,
        "welfare flag changed"
      );
    } else if evaluation.flag.is_none() {
      debug!(animal_id = %animal.animal_id, "insufficient data, keeping prior flag");
    }
    for message in &evaluation.messages {
      warn!(animal_id = %message.animal_id, message = %message.message, "rank instability");
    }
    Ok(evaluation)
  }

  /// Evaluate one animal and persist its flag.
  pub async fn evaluate_animal(&self, id: &AnimalId) -> Result<AlertEvaluation> {
    let animal = self.animal(id).await?;
    let ratings = self
      .trajectories()
      .await?
      .remove(&animal.animal_id)
      .unwrap_or_default();
    self.evaluate(&animal, ratings, Utc::now()).await
  }

  /// Evaluate every active animal.
  pub async fn evaluate_colony(&self) -> Result<ColonyEvaluation> {
    let now = Utc::now();
    let animals = self.animals(AnimalQuery::default()).await?;
    let mut trajectories = self.trajectories().await?;

    let mut evaluations = Vec::with_capacity(animals.len());
    for animal in &animals {
      let ratings = trajectories.remove(&animal.animal_id).unwrap_or_default();
      evaluations.push(self.evaluate(animal, ratings, now).await?);
    }
    let messages: Vec<AlertMessage> = evaluations
      .iter()
      .flat_map(|e| e.messages.iter().cloned())
      .collect();

    info!(
      animals = evaluations.len(),
      red = evaluations.iter().filter(|e| e.flag == Some(WelfareFlag::Red)).count(),
      messages = messages.len(),
      "colony evaluated"
    );
    Ok(ColonyEvaluation { evaluated_at: now, evaluations, messages })
  }

  // ── Dashboard ─────────────────────────────────────────────────────────

  pub async fn dashboard(&self) -> Result<DashboardSummary> {
    self.refresh_ranks().await?;

    let now = Utc::now();
    let recent = LogQuery {
      since: Some(now - Duration::days(DASHBOARD_WINDOW_DAYS)),
      ..Default::default()
    };
    let animals = self.animals(AnimalQuery::default()).await?;
    let behavior = self.behaviors(recent.clone()).await?;
    let stress = self.stress_logs(recent.clone()).await?;
    let enrichment = self.enrichment_logs(recent).await?;
    let dominance = rank::dominance_index(
      &self.store.dominance_events().await.map_err(Error::store)?,
    )?;

    let mut latest_stress: BTreeMap<&AnimalId, f64> = BTreeMap::new();
    for log in &stress {
      latest_stress.insert(&log.animal_id, log.value);
    }
    let mut sessions: BTreeMap<&AnimalId, Vec<EnrichmentLog>> = BTreeMap::new();
    for log in &enrichment {
      sessions.entry(&log.animal_id).or_default().push(log.clone());
    }

    let mut rows: Vec<AnimalSummary> = animals
      .iter()
      .map(|animal| AnimalSummary {
        animal_id:       animal.animal_id.clone(),
        name:            animal.name.clone(),
        cage_id:         animal.cage_id.clone(),
        sex:             animal.sex,
        rank:            animal.rank.value,
        rank_origin:     animal.rank.origin,
        welfare_flag:    animal.welfare_flag,
        dominance_index: dominance
          .get(&animal.animal_id)
          .map_or(0.0, |record| record.index()),
        latest_stress:   latest_stress.get(&animal.animal_id).copied(),
        enrichment:      enrichment_summary(
          sessions
            .get(&animal.animal_id)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        ),
      })
      .collect();
    rows.sort_by(|a, b| {
      b.rank.total_cmp(&a.rank).then_with(|| a.animal_id.cmp(&b.animal_id))
    });

    Ok(DashboardSummary {
      generated_at: now,
      rank_cache:   self.cache().await?,
      colony:       colony_stats(&behavior, &animals, now),
      animals:      rows,
    })
  }
}
