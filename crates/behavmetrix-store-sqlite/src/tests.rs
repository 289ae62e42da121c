//! Integration tests for `SqliteStore` against an in-memory database, plus
//! the `WelfareService` flows that depend on its transactional guarantees.

use std::{
  collections::BTreeMap,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use behavmetrix_core::{
  Error,
  alert::WelfareFlag,
  animal::{Animal, AnimalId, AnimalPatch, NewAnimal, Rank, RankOrigin, Sex},
  config::EngineConfig,
  error::ValidationError,
  ethogram::BehaviorKind,
  log::{
    BehaviorEvent, COMPOSITE_INDICATOR, EnrichmentLog, EnrichmentOutcome,
    Incident, NewBehaviorEvent, NewEnrichmentLog, NewIncident, NewStressLog,
    StressLog, StressSigns,
  },
  rank::{self, DEFAULT_INITIAL_RATING, DEFAULT_K_FACTOR, OverridePolicy},
  service::{MAX_RANK_ATTEMPTS, WelfareService},
  session::{CloseSession, NewSession, ObservationSession, SessionMode},
  store::{
    AnimalQuery, ColonyStore, CommitOutcome, LogQuery, RankCacheState, RankCommit,
    RankUpdate,
  },
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{Error as StoreError, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn row(id: &str, cage: &str, sex: Sex) -> NewAnimal { NewAnimal::new(id, cage, sex) }

async fn seeded_store() -> SqliteStore {
  let s = store().await;
  for (id, cage, sex) in [
    ("M1", "C-01", Sex::Male),
    ("M2", "C-01", Sex::Male),
    ("F1", "C-02", Sex::Female),
    ("F2", "C-02", Sex::Female),
    ("F3", "C-03", Sex::Female),
  ] {
    s.add_animal(row(id, cage, sex), DEFAULT_INITIAL_RATING)
      .await
      .unwrap();
  }
  s
}

async fn service() -> WelfareService<SqliteStore> {
  WelfareService::new(Arc::new(seeded_store().await), EngineConfig::default())
}

fn id(s: &str) -> AnimalId { AnimalId::from(s) }

fn close(a: f64, b: f64) -> bool { (a - b).abs() < 1e-9 }

fn an_hour_ago() -> DateTime<Utc> { Utc::now() - Duration::hours(1) }

async fn rank_of<S: ColonyStore>(svc: &WelfareService<S>, animal: &str) -> Rank {
  svc.animal(&id(animal)).await.unwrap().rank
}

// ─── Animals ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_animal() {
  let s = store().await;
  let mut input = row("M1042", "C-07", Sex::Male);
  input.name = Some("Bruno".into());
  input.weight_kg = Some(9.4);

  let added = s.add_animal(input, DEFAULT_INITIAL_RATING).await.unwrap();
  assert_eq!(added.rank_version, 0);

  let fetched = s.get_animal(id("M1042")).await.unwrap().unwrap();
  assert_eq!(fetched.name.as_deref(), Some("Bruno"));
  assert_eq!(fetched.weight_kg, Some(9.4));
  assert_eq!(fetched.rank.value, DEFAULT_INITIAL_RATING);
  assert_eq!(fetched.rank.origin, RankOrigin::Computed);
  assert_eq!(fetched.created_at, added.created_at);
  assert!(fetched.welfare_flag.is_none());
  assert!(fetched.active);
}

#[tokio::test]
async fn get_animal_missing_returns_none() {
  let s = store().await;
  assert!(s.get_animal(id("nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn add_animal_twice_errors() {
  let s = store().await;
  s.add_animal(row("M1", "C-01", Sex::Male), 1000.0).await.unwrap();
  let err = s
    .add_animal(row("M1", "C-09", Sex::Male), 1000.0)
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::DuplicateAnimal(ref a) if a.as_str() == "M1"));
}

#[tokio::test]
async fn upsert_refreshes_roster_but_keeps_flag_and_rank() {
  let s = seeded_store().await;
  s.set_welfare_flag(id("F1"), WelfareFlag::Yellow).await.unwrap();

  let mut moved = row("F1", "C-09", Sex::Female);
  moved.matriline = Some("Hazel".into());
  let updated = s.upsert_animal(moved, 1500.0).await.unwrap();

  assert_eq!(updated.cage_id, "C-09");
  assert_eq!(updated.matriline.as_deref(), Some("Hazel"));
  assert_eq!(updated.welfare_flag, Some(WelfareFlag::Yellow));
  assert_eq!(updated.rank.value, DEFAULT_INITIAL_RATING);
}

#[tokio::test]
async fn list_animals_filters() {
  let s = seeded_store().await;
  let mut named = row("M3", "C-04", Sex::Male);
  named.name = Some("Rocky".into());
  s.add_animal(named, 1000.0).await.unwrap();
  s.set_active(id("F3"), false).await.unwrap();

  let all = s.list_animals(AnimalQuery::default()).await.unwrap();
  assert_eq!(all.len(), 5);
  assert!(all.iter().all(|a| a.active));

  let with_inactive = s
    .list_animals(AnimalQuery { include_inactive: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(with_inactive.len(), 6);

  let cage = s
    .list_animals(AnimalQuery { cage: Some("C-02".into()), ..Default::default() })
    .await
    .unwrap();
  let ids: Vec<&str> = cage.iter().map(|a| a.animal_id.as_str()).collect();
  assert_eq!(ids, ["F1", "F2"]);

  let males = s
    .list_animals(AnimalQuery { sex: Some(Sex::Male), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(males.len(), 3);

  let search = s
    .list_animals(AnimalQuery { search: Some("rock".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(search.len(), 1);
  assert_eq!(search[0].animal_id.as_str(), "M3");
}

#[tokio::test]
async fn set_active_missing_returns_none() {
  let s = store().await;
  assert!(s.set_active(id("ghost"), false).await.unwrap().is_none());
  assert!(!s.set_welfare_flag(id("ghost"), WelfareFlag::Red).await.unwrap());
}

// ─── Logs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn behavior_log_reads_oldest_first_and_limit_keeps_latest() {
  let s = seeded_store().await;
  let t0 = an_hour_ago();
  for (minutes, kind) in [
    (0, BehaviorKind::Grooming),
    (10, BehaviorKind::Play),
    (5, BehaviorKind::Foraging),
  ] {
    s.record_behavior(
      NewBehaviorEvent::new("M1", kind).at(t0 + Duration::minutes(minutes)),
    )
    .await
    .unwrap();
  }

  let all = s.behavior_events(LogQuery::default()).await.unwrap();
  let kinds: Vec<BehaviorKind> = all.iter().map(|e| e.behavior).collect();
  assert_eq!(
    kinds,
    [BehaviorKind::Grooming, BehaviorKind::Foraging, BehaviorKind::Play]
  );

  let latest = s
    .behavior_events(LogQuery { limit: Some(2), ..Default::default() })
    .await
    .unwrap();
  let kinds: Vec<BehaviorKind> = latest.iter().map(|e| e.behavior).collect();
  assert_eq!(kinds, [BehaviorKind::Foraging, BehaviorKind::Play]);
}

#[tokio::test]
async fn behavior_query_matches_actor_or_target() {
  let s = seeded_store().await;
  s.record_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Grooming, "F1"))
    .await
    .unwrap();
  s.record_behavior(NewBehaviorEvent::new("F2", BehaviorKind::Play))
    .await
    .unwrap();

  let for_f1 = s
    .behavior_events(LogQuery::for_animal(id("F1"), None))
    .await
    .unwrap();
  assert_eq!(for_f1.len(), 1);
  assert_eq!(for_f1[0].actor_id.as_str(), "M1");
}

#[tokio::test]
async fn dominance_events_skip_affiliative_behaviors() {
  let s = seeded_store().await;
  s.record_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Grooming, "M2"))
    .await
    .unwrap();
  s.record_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Displacement, "M2"))
    .await
    .unwrap();
  s.record_behavior(NewBehaviorEvent::new("F1", BehaviorKind::Stereotypy))
    .await
    .unwrap();

  let events = s.dominance_events().await.unwrap();
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].behavior, BehaviorKind::Displacement);
}

#[tokio::test]
async fn stress_and_enrichment_round_trip() {
  let s = seeded_store().await;
  let at = an_hour_ago();
  let stored = s
    .record_stress(NewStressLog::new("F2", "hair_cortisol", 12.5).at(at))
    .await
    .unwrap();
  let mut session = NewEnrichmentLog::new("F2", "puzzle feeder", EnrichmentOutcome::Partial);
  session.duration_minutes = Some(15.0);
  session.frequency = 2;
  s.record_enrichment(session).await.unwrap();

  let stress = s
    .stress_logs(LogQuery::for_animal(id("F2"), None))
    .await
    .unwrap();
  assert_eq!(stress, vec![stored]);

  let enrichment = s
    .enrichment_logs(LogQuery::for_animal(id("F2"), Some(at)))
    .await
    .unwrap();
  assert_eq!(enrichment.len(), 1);
  assert_eq!(enrichment[0].outcome, EnrichmentOutcome::Partial);
  assert_eq!(enrichment[0].frequency, 2);
  assert_eq!(enrichment[0].duration_minutes, Some(15.0));
}

// ─── Rank commits ────────────────────────────────────────────────────────────

#[tokio::test]
async fn commit_applies_updates_and_bumps_versions() {
  let s = seeded_store().await;
  let m1 = s.get_animal(id("M1")).await.unwrap().unwrap();
  let cache = s.rank_cache().await.unwrap();
  let at = Utc::now();

  let outcome = s
    .commit_ranks(RankCommit {
      updates:             vec![RankUpdate {
        animal_id:        id("M1"),
        expected_version: m1.rank_version,
        rank:             Rank::manual(1234.0, at),
      }],
      expected_generation: cache.generation,
      stale:               false,
      applied_through:     Some(at),
    })
    .await
    .unwrap();

  let CommitOutcome::Applied(written) = outcome else {
    panic!("commit should apply");
  };
  assert_eq!(written[0].rank.value, 1234.0);
  assert_eq!(written[0].rank.origin, RankOrigin::Manual);
  assert_eq!(written[0].rank_version, m1.rank_version + 1);

  let after = s.rank_cache().await.unwrap();
  assert_eq!(after.generation, cache.generation + 1);
  assert!(after.applied_through.is_some());
}

#[tokio::test]
async fn stale_version_conflicts_and_writes_nothing() {
  let s = seeded_store().await;
  let cache = s.rank_cache().await.unwrap();
  let now = Utc::now();

  let outcome = s
    .commit_ranks(RankCommit {
      updates:             vec![
        RankUpdate {
          animal_id:        id("M1"),
          expected_version: 0,
          rank:             Rank::computed(1100.0, now),
        },
        RankUpdate {
          animal_id:        id("M2"),
          expected_version: 7,
          rank:             Rank::computed(900.0, now),
        },
      ],
      expected_generation: cache.generation,
      stale:               false,
      applied_through:     Some(now),
    })
    .await
    .unwrap();
  assert!(matches!(outcome, CommitOutcome::Conflict));

  let m1 = s.get_animal(id("M1")).await.unwrap().unwrap();
  assert_eq!(m1.rank.value, DEFAULT_INITIAL_RATING);
  assert_eq!(m1.rank_version, 0);
  assert_eq!(s.rank_cache().await.unwrap(), cache);
}

#[tokio::test]
async fn stale_mark_invalidates_pending_commit() {
  let s = seeded_store().await;
  let cache = s.rank_cache().await.unwrap();

  let marked = s.mark_ranks_stale().await.unwrap();
  assert!(marked.stale);
  assert_eq!(marked.generation, cache.generation + 1);

  let outcome = s
    .commit_ranks(RankCommit {
      updates:             vec![],
      expected_generation: cache.generation,
      stale:               false,
      applied_through:     None,
    })
    .await
    .unwrap();
  assert!(matches!(outcome, CommitOutcome::Conflict));
  assert!(s.rank_cache().await.unwrap().stale);
}

// ─── Service: logging and validation ─────────────────────────────────────────

#[tokio::test]
async fn aggression_moves_ranks_incrementally() {
  let svc = service().await;
  svc
    .log_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"))
    .await
    .unwrap();

  assert!(close(rank_of(&svc, "M1").await.value, 1016.0));
  assert!(close(rank_of(&svc, "M2").await.value, 984.0));
  assert!(!svc.store().rank_cache().await.unwrap().stale);
}

#[tokio::test]
async fn submission_credits_the_recipient() {
  let svc = service().await;
  svc
    .log_behavior(NewBehaviorEvent::dyadic("F1", BehaviorKind::Submission, "F2"))
    .await
    .unwrap();

  assert!(close(rank_of(&svc, "F2").await.value, 1016.0));
  assert!(close(rank_of(&svc, "F1").await.value, 984.0));
}

#[tokio::test]
async fn self_interaction_is_rejected_and_not_stored() {
  let svc = service().await;
  let err = svc
    .log_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M1"))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Validation(ValidationError::SelfInteraction(ref a)) if a.as_str() == "M1"
  ));
  assert!(svc.behaviors(LogQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_and_inactive_animals_are_rejected() {
  let svc = service().await;
  let err = svc
    .log_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "X9"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::UnknownAnimal(_))));

  svc.deactivate(&id("F3")).await.unwrap();
  let err = svc
    .log_stress(NewStressLog::new("F3", "fecal_cortisol", 3.0))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::InactiveAnimal(_))));
}

#[tokio::test]
async fn batch_is_all_or_nothing_on_validation() {
  let svc = service().await;
  let err = svc
    .log_behaviors(vec![
      NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"),
      NewBehaviorEvent::new("F1", BehaviorKind::Displacement),
    ])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::MissingTarget(_))));
  assert!(svc.behaviors(LogQuery::default()).await.unwrap().is_empty());

  let logged = svc
    .log_behaviors(vec![
      NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"),
      NewBehaviorEvent::new("F1", BehaviorKind::Foraging),
    ])
    .await
    .unwrap();
  assert_eq!(logged.len(), 2);
}

#[tokio::test]
async fn import_roster_upserts_and_rejects_duplicate_rows() {
  let svc = service().await;
  let imported = svc
    .import_roster(vec![row("M1", "C-10", Sex::Male), row("N1", "C-10", Sex::Female)])
    .await
    .unwrap();
  assert_eq!(imported.len(), 2);
  assert_eq!(svc.animal(&id("M1")).await.unwrap().cage_id, "C-10");

  let err = svc
    .import_roster(vec![row("N2", "C-11", Sex::Male), row("N2", "C-12", Sex::Male)])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::DuplicateAnimal(_))));
  assert!(matches!(
    svc.animal(&id("N2")).await.unwrap_err(),
    Error::AnimalNotFound(_)
  ));
}

#[tokio::test]
async fn add_animal_uses_configured_initial_rating() {
  let config = EngineConfig {
    elo: rank::EloConfig { initial_rating: 1500.0, k_factor: DEFAULT_K_FACTOR },
    ..Default::default()
  };
  let svc = WelfareService::new(Arc::new(store().await), config);
  let added = svc.add_animal(row("M1", "C-01", Sex::Male)).await.unwrap();
  assert_eq!(added.rank.value, 1500.0);

  let err = svc.add_animal(row("M1", "C-01", Sex::Male)).await.unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::DuplicateAnimal(_))));
}

#[tokio::test]
async fn stress_signs_are_stored_as_composite() {
  let svc = service().await;
  let log = svc
    .log_stress_signs(StressSigns {
      animal_id: Some(id("F1")),
      fear_grimace: true,
      pacing: true,
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(log.indicator, COMPOSITE_INDICATOR);
  assert_eq!(log.value, 5.0);
}

// ─── Service: rank cache ─────────────────────────────────────────────────────

#[tokio::test]
async fn incremental_ranks_match_full_recompute() {
  let svc = service().await;
  let t0 = an_hour_ago();
  for (minutes, actor, kind, target) in [
    (0, "M1", BehaviorKind::Aggression, "M2"),
    (1, "F1", BehaviorKind::Submission, "M1"),
    (2, "M2", BehaviorKind::Displacement, "F1"),
    (3, "F2", BehaviorKind::Aggression, "M1"),
    (4, "M2", BehaviorKind::Grooming, "F2"),
  ] {
    svc
      .log_behavior(
        NewBehaviorEvent::dyadic(actor, kind, target).at(t0 + Duration::minutes(minutes)),
      )
      .await
      .unwrap();
  }
  assert!(!svc.store().rank_cache().await.unwrap().stale);
  let live = svc.ranks().await.unwrap();

  let recomputed = svc.recompute_ranks(OverridePolicy::Preserve).await.unwrap();
  assert_eq!(live.len(), recomputed.len());
  for (a, b) in live.iter().zip(&recomputed) {
    assert_eq!(a.animal_id, b.animal_id);
    assert!(close(a.rank.value, b.rank.value), "{}", a.animal_id);
  }
}

#[tokio::test]
async fn backdated_event_marks_stale_and_lazy_read_recomputes() {
  let svc = service().await;
  let t0 = an_hour_ago();
  svc
    .log_behavior(
      NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2")
        .at(t0 + Duration::minutes(10)),
    )
    .await
    .unwrap();
  svc
    .log_behavior(
      NewBehaviorEvent::dyadic("M2", BehaviorKind::Aggression, "F1")
        .at(t0 + Duration::minutes(5)),
    )
    .await
    .unwrap();
  assert!(svc.store().rank_cache().await.unwrap().stale);

  let events = svc.store().dominance_events().await.unwrap();
  let expected = rank::recompute_ranks(&events, DEFAULT_INITIAL_RATING, DEFAULT_K_FACTOR).unwrap();

  let ranks = svc.ranks().await.unwrap();
  for entry in &ranks {
    let want = expected
      .get(&entry.animal_id)
      .copied()
      .unwrap_or(DEFAULT_INITIAL_RATING);
    assert!(close(entry.rank.value, want), "{}", entry.animal_id);
  }
  assert_eq!(ranks[0].animal_id.as_str(), "M1");
  assert!(!svc.store().rank_cache().await.unwrap().stale);
}

#[tokio::test]
async fn live_contest_against_manual_rank_matches_recompute() {
  let svc = service().await;
  svc
    .override_ranks(BTreeMap::from([(id("M1"), 1200.0)]))
    .await
    .unwrap();
  svc
    .log_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"))
    .await
    .unwrap();
  assert!(svc.store().rank_cache().await.unwrap().stale);

  let live = svc.ranks().await.unwrap();
  let m1 = rank_of(&svc, "M1").await;
  assert_eq!((m1.value, m1.origin), (1200.0, RankOrigin::Manual));
  let m2 = rank_of(&svc, "M2").await.value;
  assert!(close(m2, 984.0), "{m2}");

  // A recompute with no new events changes nothing.
  let recomputed = svc.recompute_ranks(OverridePolicy::Preserve).await.unwrap();
  assert_eq!(live.len(), recomputed.len());
  for (a, b) in live.iter().zip(&recomputed) {
    assert_eq!(a.animal_id, b.animal_id);
    assert!(close(a.rank.value, b.rank.value), "{}", a.animal_id);
  }
}

#[tokio::test]
async fn contests_between_computed_ranks_stay_incremental_beside_an_override() {
  let svc = service().await;
  svc
    .override_ranks(BTreeMap::from([(id("F3"), 1200.0)]))
    .await
    .unwrap();
  svc
    .log_behavior(NewBehaviorEvent::dyadic("F1", BehaviorKind::Aggression, "F2"))
    .await
    .unwrap();
  assert!(!svc.store().rank_cache().await.unwrap().stale);
  assert!(close(rank_of(&svc, "F1").await.value, 1016.0));
  assert_eq!(rank_of(&svc, "F3").await.value, 1200.0);
}

#[tokio::test]
async fn recompute_preserves_or_replaces_overrides() {
  let svc = service().await;
  svc
    .log_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"))
    .await
    .unwrap();
  svc
    .override_ranks(BTreeMap::from([(id("M2"), 1300.0)]))
    .await
    .unwrap();

  svc.recompute_ranks(OverridePolicy::Preserve).await.unwrap();
  let m2 = rank_of(&svc, "M2").await;
  assert_eq!((m2.value, m2.origin), (1300.0, RankOrigin::Manual));

  svc.recompute_ranks(OverridePolicy::Replace).await.unwrap();
  let m2 = rank_of(&svc, "M2").await;
  assert!(close(m2.value, 984.0));
  assert_eq!(m2.origin, RankOrigin::Computed);
}

#[tokio::test]
async fn clearing_an_override_restores_the_computed_rank() {
  let svc = service().await;
  svc
    .log_behavior(NewBehaviorEvent::dyadic("F1", BehaviorKind::Aggression, "F2"))
    .await
    .unwrap();
  svc
    .override_ranks(BTreeMap::from([(id("F1"), 900.0)]))
    .await
    .unwrap();

  let released = svc.clear_override(&id("F1")).await.unwrap();
  assert_eq!(released.rank.origin, RankOrigin::Computed);
  assert!(svc.store().rank_cache().await.unwrap().stale);

  svc.ranks().await.unwrap();
  assert!(close(rank_of(&svc, "F1").await.value, 1016.0));
}

#[tokio::test]
async fn override_validation() {
  let svc = service().await;
  let err = svc.override_ranks(BTreeMap::new()).await.unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::EmptyField { .. })));

  let err = svc
    .override_ranks(BTreeMap::from([(id("M1"), f64::NAN)]))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::InvalidValue { .. })));

  let err = svc
    .override_ranks(BTreeMap::from([(id("ghost"), 1100.0)]))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::UnknownAnimal(_))));

  assert!(matches!(
    svc.clear_override(&id("ghost")).await.unwrap_err(),
    Error::AnimalNotFound(_)
  ));
}

// ─── Service: alerts ─────────────────────────────────────────────────────────

#[tokio::test]
async fn high_stress_flags_red_and_persists() {
  let svc = service().await;
  svc
    .log_stress(NewStressLog::new("M2", COMPOSITE_INDICATOR, 9.5))
    .await
    .unwrap();

  let eval = svc.evaluate_animal(&id("M2")).await.unwrap();
  assert_eq!(eval.flag, Some(WelfareFlag::Red));
  assert_eq!(
    svc.animal(&id("M2")).await.unwrap().welfare_flag,
    Some(WelfareFlag::Red)
  );
}

#[tokio::test]
async fn no_data_keeps_prior_flag() {
  let svc = service().await;
  svc
    .store()
    .set_welfare_flag(id("F2"), WelfareFlag::Yellow)
    .await
    .unwrap();

  let eval = svc.evaluate_animal(&id("F2")).await.unwrap();
  assert_eq!(eval.flag, None);
  assert_eq!(
    svc.animal(&id("F2")).await.unwrap().welfare_flag,
    Some(WelfareFlag::Yellow)
  );
}

#[tokio::test]
async fn out_of_window_data_does_not_count() {
  let svc = service().await;
  svc
    .log_stress(
      NewStressLog::new("F1", COMPOSITE_INDICATOR, 9.0).at(Utc::now() - Duration::days(40)),
    )
    .await
    .unwrap();
  let eval = svc.evaluate_animal(&id("F1")).await.unwrap();
  assert_eq!(eval.flag, None);
}

#[tokio::test]
async fn winning_streak_reports_rapid_rise() {
  let svc = service().await;
  for target in ["M2", "F1", "F2", "F3"] {
    svc
      .log_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Displacement, target))
      .await
      .unwrap();
  }

  let colony = svc.evaluate_colony().await.unwrap();
  assert_eq!(colony.evaluations.len(), 5);
  assert_eq!(colony.messages.len(), 1);
  assert_eq!(colony.messages[0].animal_id.as_str(), "M1");
  assert!(colony.messages[0].message.contains("increase"));
}

#[tokio::test]
async fn missing_animal_evaluation_is_not_found() {
  let svc = service().await;
  assert!(matches!(
    svc.evaluate_animal(&id("ghost")).await.unwrap_err(),
    Error::AnimalNotFound(_)
  ));
}

// ─── Service: dashboard ──────────────────────────────────────────────────────

#[tokio::test]
async fn dashboard_summarises_colony() {
  let svc = service().await;
  svc
    .log_behavior(NewBehaviorEvent::dyadic("F1", BehaviorKind::Aggression, "F2"))
    .await
    .unwrap();
  svc
    .log_behavior(NewBehaviorEvent::dyadic("F2", BehaviorKind::Grooming, "F1"))
    .await
    .unwrap();
  svc
    .log_stress(NewStressLog::new("F2", COMPOSITE_INDICATOR, 3.0))
    .await
    .unwrap();
  let mut session = NewEnrichmentLog::new("F1", "ice treat", EnrichmentOutcome::Engaged);
  session.duration_minutes = Some(12.0);
  svc.log_enrichment(session).await.unwrap();

  let summary = svc.dashboard().await.unwrap();
  assert_eq!(summary.colony.total_animals, 5);
  assert_eq!(summary.colony.observations, 2);
  assert_eq!(summary.colony.grooming_pct, 50.0);
  assert_eq!(summary.colony.aggression_count, 1);
  assert_eq!(summary.colony.observed_today, 2);

  let top = &summary.animals[0];
  assert_eq!(top.animal_id.as_str(), "F1");
  assert_eq!(top.dominance_index, 1.0);
  assert_eq!(top.enrichment.minutes, 12.0);

  let f2 = summary
    .animals
    .iter()
    .find(|a| a.animal_id.as_str() == "F2")
    .unwrap();
  assert_eq!(f2.latest_stress, Some(3.0));
  assert_eq!(f2.dominance_index, -1.0);
  assert_eq!(summary.animals.last().unwrap().animal_id.as_str(), "F2");
}

// ─── Animals: patch ──────────────────────────────────────────────────────────

#[tokio::test]
async fn patch_changes_only_given_roster_fields() {
  let svc = service().await;
  svc
    .override_ranks(BTreeMap::from([(id("F1"), 1300.0)]))
    .await
    .unwrap();

  let patch = AnimalPatch {
    cage_id: Some("C-09".into()),
    weight_kg: Some(7.25),
    ..Default::default()
  };
  let updated = svc.update_animal(&id("F1"), patch).await.unwrap();
  assert_eq!(updated.cage_id, "C-09");
  assert_eq!(updated.weight_kg, Some(7.25));
  assert_eq!(updated.sex, Sex::Female);
  assert!(updated.name.is_none());
  assert_eq!(updated.rank.value, 1300.0);
  assert!(updated.rank.is_manual());
  assert!(updated.active);
}

#[tokio::test]
async fn patch_rejects_missing_animal_and_empty_body() {
  let svc = service().await;
  let patch = AnimalPatch { name: Some("Pip".into()), ..Default::default() };
  assert!(matches!(
    svc.update_animal(&id("nope"), patch).await.unwrap_err(),
    Error::AnimalNotFound(_)
  ));
  assert!(matches!(
    svc.update_animal(&id("M1"), AnimalPatch::default()).await.unwrap_err(),
    Error::Validation(ValidationError::EmptyField { field: "patch" })
  ));
}

// ─── Behavior batches ────────────────────────────────────────────────────────

#[tokio::test]
async fn record_behaviors_rolls_back_when_one_insert_fails() {
  let s = seeded_store().await;
  // Skips service validation; the intensity CHECK rejects the second row.
  let mut bad = NewBehaviorEvent::new("F1", BehaviorKind::Play);
  bad.intensity = 9;
  let result = s
    .record_behaviors(vec![
      NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"),
      bad,
      NewBehaviorEvent::new("F2", BehaviorKind::Foraging),
    ])
    .await;
  assert!(matches!(result, Err(StoreError::Database(_))));
  assert!(s.behavior_events(LogQuery::default()).await.unwrap().is_empty());

  let stored = s
    .record_behaviors(vec![
      NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"),
      NewBehaviorEvent::new("F2", BehaviorKind::Foraging),
    ])
    .await
    .unwrap();
  assert_eq!(stored.len(), 2);
  assert_eq!(stored[0].actor_id.as_str(), "M1");
  assert_eq!(s.behavior_events(LogQuery::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn batch_contests_update_ranks_in_order() {
  let svc = service().await;
  let t0 = an_hour_ago();
  svc
    .log_behaviors(vec![
      NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2").at(t0),
      NewBehaviorEvent::dyadic("M2", BehaviorKind::Submission, "M1")
        .at(t0 + Duration::minutes(1)),
    ])
    .await
    .unwrap();
  assert!(!svc.store().rank_cache().await.unwrap().stale);

  let live = svc.ranks().await.unwrap();
  let recomputed = svc.recompute_ranks(OverridePolicy::Preserve).await.unwrap();
  for (a, b) in live.iter().zip(&recomputed) {
    assert_eq!(a.animal_id, b.animal_id);
    assert!(close(a.rank.value, b.rank.value), "{}", a.animal_id);
  }
  assert!(rank_of(&svc, "M1").await.value > 1016.0);
}

// ─── Sessions ────────────────────────────────────────────────────────────────

fn cage_scan(cage: &str) -> NewSession {
  NewSession {
    name: Some("focal scan".into()),
    cage_id: Some(cage.into()),
    observer: Some("jd".into()),
    ..Default::default()
  }
}

#[tokio::test]
async fn session_collects_its_events_until_closed() {
  let svc = service().await;
  let session = svc.open_session(cage_scan("C-01")).await.unwrap();
  assert!(session.is_open());
  assert_eq!(session.mode, SessionMode::RealTime);

  svc
    .log_behavior(
      NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2")
        .in_session(session.session_id),
    )
    .await
    .unwrap();
  svc
    .log_behavior(NewBehaviorEvent::new("F1", BehaviorKind::Foraging))
    .await
    .unwrap();

  let detail = svc.session(session.session_id).await.unwrap();
  assert_eq!(detail.events.len(), 1);
  assert_eq!(detail.events[0].session_id, Some(session.session_id));
  assert_eq!(detail.session.cage_id.as_deref(), Some("C-01"));

  let closed = svc
    .close_session(
      session.session_id,
      CloseSession { ended_at: None, notes: Some("quiet morning".into()) },
    )
    .await
    .unwrap();
  assert!(!closed.is_open());
  assert_eq!(closed.notes.as_deref(), Some("quiet morning"));

  let err = svc
    .log_behavior(
      NewBehaviorEvent::new("M1", BehaviorKind::Play).in_session(session.session_id),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::SessionClosed(_))));

  let err = svc
    .close_session(session.session_id, CloseSession::default())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::SessionClosed(_))));
}

#[tokio::test]
async fn unknown_sessions_are_rejected() {
  let svc = service().await;
  let missing = Uuid::new_v4();

  let err = svc
    .log_behavior(NewBehaviorEvent::new("M1", BehaviorKind::Play).in_session(missing))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(ValidationError::UnknownSession(_))));
  assert!(svc.behaviors(LogQuery::default()).await.unwrap().is_empty());

  assert!(matches!(
    svc.session(missing).await.unwrap_err(),
    Error::SessionNotFound(_)
  ));
  assert!(matches!(
    svc.close_session(missing, CloseSession::default()).await.unwrap_err(),
    Error::SessionNotFound(_)
  ));
}

#[tokio::test]
async fn close_before_start_is_rejected() {
  let svc = service().await;
  let started = an_hour_ago();
  let session = svc
    .open_session(NewSession { started_at: Some(started), ..cage_scan("C-02") })
    .await
    .unwrap();
  let err = svc
    .close_session(
      session.session_id,
      CloseSession { ended_at: Some(started - Duration::minutes(5)), notes: None },
    )
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Validation(ValidationError::InvalidValue { field: "ended_at", .. })
  ));
  assert!(svc.session(session.session_id).await.unwrap().session.is_open());
}

#[tokio::test]
async fn sessions_list_latest_by_start() {
  let s = store().await;
  let t0 = an_hour_ago();
  for (minutes, cage) in [(20, "C-02"), (0, "C-01"), (40, "C-03")] {
    s.open_session(NewSession {
      started_at: Some(t0 + Duration::minutes(minutes)),
      mode: SessionMode::Retrospective,
      ..cage_scan(cage)
    })
    .await
    .unwrap();
  }

  let all = s.list_sessions(None).await.unwrap();
  let cages: Vec<_> = all.iter().map(|x| x.cage_id.as_deref().unwrap()).collect();
  assert_eq!(cages, ["C-01", "C-02", "C-03"]);
  assert!(all.iter().all(|x| x.mode == SessionMode::Retrospective));

  let latest = s.list_sessions(Some(2)).await.unwrap();
  assert_eq!(latest.len(), 2);
  assert_eq!(latest[1].cage_id.as_deref(), Some("C-03"));
}

// ─── Incidents ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn incidents_round_trip_with_tags_and_session() {
  let svc = service().await;
  let session = svc.open_session(cage_scan("C-01")).await.unwrap();

  let mut report = NewIncident::new("laceration on left forearm");
  report.animal_id = Some(id("M2"));
  report.session_id = Some(session.session_id);
  report.tags = vec!["injury".into(), "fight".into()];
  report.attachment_url = Some("https://media.example/m2-arm.jpg".into());
  report.media_type = Some("image/jpeg".into());
  let logged = svc.log_incident(report).await.unwrap();

  svc
    .log_incident(NewIncident::new("feeder jammed"))
    .await
    .unwrap();

  let for_m2 = svc
    .incidents(LogQuery::for_animal(id("M2"), None))
    .await
    .unwrap();
  assert_eq!(for_m2, vec![logged]);
  assert_eq!(for_m2[0].tags, ["injury", "fight"]);
  assert_eq!(for_m2[0].session_id, Some(session.session_id));

  let all = svc.incidents(LogQuery::default()).await.unwrap();
  assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn incident_references_must_exist() {
  let svc = service().await;
  let mut report = NewIncident::new("escape attempt");
  report.animal_id = Some(id("ghost"));
  assert!(matches!(
    svc.log_incident(report).await.unwrap_err(),
    Error::Validation(ValidationError::UnknownAnimal(_))
  ));

  let mut report = NewIncident::new("escape attempt");
  report.session_id = Some(Uuid::new_v4());
  assert!(matches!(
    svc.log_incident(report).await.unwrap_err(),
    Error::Validation(ValidationError::UnknownSession(_))
  ));
  assert!(svc.incidents(LogQuery::default()).await.unwrap().is_empty());
}

// ─── Service: concurrency ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logging_converges_to_full_replay() {
  let svc = Arc::new(service().await);
  let animals = ["M1", "M2", "F1", "F2", "F3"];
  let t0 = an_hour_ago();

  let mut tasks = Vec::new();
  for i in 0..30_usize {
    let svc = svc.clone();
    // Offsets 1..=4 keep actor and target distinct.
    let actor = animals[i % 5];
    let target = animals[(i + 1 + (i / 5) % 4) % 5];
    tasks.push(tokio::spawn(async move {
      svc
        .log_behavior(
          NewBehaviorEvent::dyadic(actor, BehaviorKind::Aggression, target)
            .at(t0 + Duration::seconds(i as i64)),
        )
        .await
    }));
  }
  for task in tasks {
    task.await.unwrap().unwrap();
  }

  let events = svc.store().dominance_events().await.unwrap();
  assert_eq!(events.len(), 30);
  let expected =
    rank::recompute_ranks(&events, DEFAULT_INITIAL_RATING, DEFAULT_K_FACTOR).unwrap();

  let live = svc.ranks().await.unwrap();
  assert_eq!(live.len(), animals.len());
  for entry in &live {
    let want = expected
      .get(&entry.animal_id)
      .copied()
      .unwrap_or(DEFAULT_INITIAL_RATING);
    assert!(
      close(entry.rank.value, want),
      "{}: {} != {want}",
      entry.animal_id,
      entry.rank.value
    );
  }
}

/// Delegates to an in-memory store but rejects every rank commit, as if
/// another writer always got there first.
struct ContendedStore {
  inner:   SqliteStore,
  commits: AtomicUsize,
}

impl ContendedStore {
  async fn new() -> Arc<Self> {
    Arc::new(Self { inner: seeded_store().await, commits: AtomicUsize::new(0) })
  }

  fn commits(&self) -> usize { self.commits.load(Ordering::SeqCst) }
}

impl ColonyStore for ContendedStore {
  type Error = StoreError;

  async fn add_animal(&self, input: NewAnimal, rating: f64) -> Result<Animal, StoreError> {
    self.inner.add_animal(input, rating).await
  }

  async fn upsert_animal(&self, input: NewAnimal, rating: f64) -> Result<Animal, StoreError> {
    self.inner.upsert_animal(input, rating).await
  }

  async fn update_animal(
    &self,
    id: AnimalId,
    patch: AnimalPatch,
  ) -> Result<Option<Animal>, StoreError> {
    self.inner.update_animal(id, patch).await
  }

  async fn get_animal(&self, id: AnimalId) -> Result<Option<Animal>, StoreError> {
    self.inner.get_animal(id).await
  }

  async fn list_animals(&self, query: AnimalQuery) -> Result<Vec<Animal>, StoreError> {
    self.inner.list_animals(query).await
  }

  async fn set_active(&self, id: AnimalId, active: bool) -> Result<Option<Animal>, StoreError> {
    self.inner.set_active(id, active).await
  }

  async fn set_welfare_flag(&self, id: AnimalId, flag: WelfareFlag) -> Result<bool, StoreError> {
    self.inner.set_welfare_flag(id, flag).await
  }

  async fn record_behavior(&self, input: NewBehaviorEvent) -> Result<BehaviorEvent, StoreError> {
    self.inner.record_behavior(input).await
  }

  async fn record_behaviors(
    &self,
    inputs: Vec<NewBehaviorEvent>,
  ) -> Result<Vec<BehaviorEvent>, StoreError> {
    self.inner.record_behaviors(inputs).await
  }

  async fn record_stress(&self, input: NewStressLog) -> Result<StressLog, StoreError> {
    self.inner.record_stress(input).await
  }

  async fn record_enrichment(
    &self,
    input: NewEnrichmentLog,
  ) -> Result<EnrichmentLog, StoreError> {
    self.inner.record_enrichment(input).await
  }

  async fn record_incident(&self, input: NewIncident) -> Result<Incident, StoreError> {
    self.inner.record_incident(input).await
  }

  async fn behavior_events(&self, query: LogQuery) -> Result<Vec<BehaviorEvent>, StoreError> {
    self.inner.behavior_events(query).await
  }

  async fn dominance_events(&self) -> Result<Vec<BehaviorEvent>, StoreError> {
    self.inner.dominance_events().await
  }

  async fn stress_logs(&self, query: LogQuery) -> Result<Vec<StressLog>, StoreError> {
    self.inner.stress_logs(query).await
  }

  async fn enrichment_logs(&self, query: LogQuery) -> Result<Vec<EnrichmentLog>, StoreError> {
    self.inner.enrichment_logs(query).await
  }

  async fn incidents(&self, query: LogQuery) -> Result<Vec<Incident>, StoreError> {
    self.inner.incidents(query).await
  }

  async fn open_session(&self, input: NewSession) -> Result<ObservationSession, StoreError> {
    self.inner.open_session(input).await
  }

  async fn close_session(
    &self,
    id: Uuid,
    ended_at: DateTime<Utc>,
    notes: Option<String>,
  ) -> Result<Option<ObservationSession>, StoreError> {
    self.inner.close_session(id, ended_at, notes).await
  }

  async fn get_session(&self, id: Uuid) -> Result<Option<ObservationSession>, StoreError> {
    self.inner.get_session(id).await
  }

  async fn list_sessions(
    &self,
    limit: Option<usize>,
  ) -> Result<Vec<ObservationSession>, StoreError> {
    self.inner.list_sessions(limit).await
  }

  async fn session_events(&self, id: Uuid) -> Result<Vec<BehaviorEvent>, StoreError> {
    self.inner.session_events(id).await
  }

  async fn rank_cache(&self) -> Result<RankCacheState, StoreError> {
    self.inner.rank_cache().await
  }

  async fn mark_ranks_stale(&self) -> Result<RankCacheState, StoreError> {
    self.inner.mark_ranks_stale().await
  }

  async fn commit_ranks(&self, _commit: RankCommit) -> Result<CommitOutcome, StoreError> {
    self.commits.fetch_add(1, Ordering::SeqCst);
    Ok(CommitOutcome::Conflict)
  }
}

#[tokio::test]
async fn rank_writes_give_up_after_bounded_retries() {
  let store = ContendedStore::new().await;
  let svc = WelfareService::new(store.clone(), EngineConfig::default());

  let err = svc
    .recompute_ranks(OverridePolicy::Preserve)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ConcurrencyConflict { attempts: 3 }));
  assert_eq!(store.commits(), MAX_RANK_ATTEMPTS);

  let err = svc
    .override_ranks(BTreeMap::from([(id("M1"), 1200.0)]))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ConcurrencyConflict { attempts: 3 }));
  assert_eq!(store.commits(), 2 * MAX_RANK_ATTEMPTS);
  assert!(!rank_of(&svc, "M1").await.is_manual());
}

#[tokio::test]
async fn contended_live_update_falls_back_to_stale() {
  let store = ContendedStore::new().await;
  let svc = WelfareService::new(store.clone(), EngineConfig::default());

  let event = svc
    .log_behavior(NewBehaviorEvent::dyadic("M1", BehaviorKind::Aggression, "M2"))
    .await
    .unwrap();
  assert_eq!(store.commits(), MAX_RANK_ATTEMPTS);

  let cache = svc.store().rank_cache().await.unwrap();
  assert!(cache.stale);
  assert_eq!(
    svc.behaviors(LogQuery::default()).await.unwrap()[0].event_id,
    event.event_id
  );
  assert_eq!(rank_of(&svc, "M1").await.value, DEFAULT_INITIAL_RATING);
}
