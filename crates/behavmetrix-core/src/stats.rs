//! Dashboard read models. Never stored, always derived from the logs and the
//! cached ranks.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  alert::WelfareFlag,
  animal::{Animal, AnimalId, RankOrigin, Sex},
  ethogram::BehaviorKind,
  log::{BehaviorEvent, EnrichmentLog},
  store::RankCacheState,
};

/// How far back the dashboard looks for behavior and enrichment activity.
pub const DASHBOARD_WINDOW_DAYS: i64 = 30;

// ─── Colony ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColonyStats {
  pub total_animals:    usize,
  pub observations:     usize,
  /// Share of observations that are grooming, in percent.
  pub grooming_pct:     f64,
  pub aggression_count: usize,
  pub play_count:       usize,
  /// Active animals with at least one event as actor today (UTC).
  pub observed_today:   usize,
}

pub fn colony_stats(
  events: &[BehaviorEvent],
  animals: &[Animal],
  now: DateTime<Utc>,
) -> ColonyStats {
  let count = |kind: BehaviorKind| events.iter().filter(|e| e.behavior == kind).count();

  let grooming_pct = if events.is_empty() {
    0.0
  } else {
    let pct = count(BehaviorKind::Grooming) as f64 * 100.0 / events.len() as f64;
    (pct * 10.0).round() / 10.0
  };

  let today = now.date_naive();
  let seen: BTreeSet<&AnimalId> = events
    .iter()
    .filter(|e| e.observed_at.date_naive() == today)
    .map(|e| &e.actor_id)
    .collect();
  let active: Vec<&Animal> = animals.iter().filter(|a| a.active).collect();

  ColonyStats {
    total_animals: active.len(),
    observations: events.len(),
    grooming_pct,
    aggression_count: count(BehaviorKind::Aggression),
    play_count: count(BehaviorKind::Play),
    observed_today: active.iter().filter(|a| seen.contains(&a.animal_id)).count(),
  }
}

// ─── Per animal ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
  pub sessions:   u32,
  pub minutes:    f64,
  /// Frequency-weighted engagement, `None` without sessions.
  pub engagement: Option<f64>,
}

pub fn enrichment_summary(logs: &[EnrichmentLog]) -> EnrichmentSummary {
  let sessions: u32 = logs.iter().map(|l| l.frequency).sum();
  let minutes: f64 = logs.iter().filter_map(|l| l.duration_minutes).sum();
  let engagement = (sessions > 0).then(|| {
    logs
      .iter()
      .map(|l| l.outcome.engagement() * f64::from(l.frequency))
      .sum::<f64>()
      / f64::from(sessions)
  });
  EnrichmentSummary { sessions, minutes, engagement }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimalSummary {
  pub animal_id:       AnimalId,
  pub name:            Option<String>,
  pub cage_id:         String,
  pub sex:             Sex,
  pub rank:            f64,
  pub rank_origin:     RankOrigin,
  pub welfare_flag:    Option<WelfareFlag>,
  pub dominance_index: f64,
  pub latest_stress:   Option<f64>,
  pub enrichment:      EnrichmentSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
  pub generated_at: DateTime<Utc>,
  pub rank_cache:   RankCacheState,
  pub colony:       ColonyStats,
  /// Highest rank first.
  pub animals:      Vec<AnimalSummary>,
}
