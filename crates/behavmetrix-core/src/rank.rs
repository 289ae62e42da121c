//! Rank engine: Elo-style dominance ratings from dyadic interactions.
//!
//! Ratings are a pure function of the interaction log. [`recompute_ranks`]
//! replays the whole log from initial ratings; [`apply_rank_update`] folds a
//! single new contest into two current ratings. Both use the same update:
//!
//! ```text
//! expected_winner = 1 / (1 + 10^((loser - winner) / 400))
//! winner' = winner + K * (1 - expected_winner)
//! loser'  = loser  + K * (0 - (1 - expected_winner))
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  animal::{AnimalId, Rank},
  error::ValidationError,
  ethogram::Outcome,
  log::{BehaviorEvent, Contest},
};

/// Rating every animal starts from before its first contest.
pub const DEFAULT_INITIAL_RATING: f64 = 1000.0;

/// Maximum rating change per contest.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

const ELO_SCALE: f64 = 400.0;

/// Current rating per animal. Animals without contests are absent.
pub type Ratings = BTreeMap<AnimalId, f64>;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EloConfig {
  pub initial_rating: f64,
  pub k_factor:       f64,
}

impl Default for EloConfig {
  fn default() -> Self {
    Self { initial_rating: DEFAULT_INITIAL_RATING, k_factor: DEFAULT_K_FACTOR }
  }
}

impl EloConfig {
  pub fn validate(&self) -> Result<(), ValidationError> {
    if !self.initial_rating.is_finite() {
      return Err(ValidationError::InvalidValue {
        field:  "initial_rating",
        reason: "must be finite".into(),
      });
    }
    if !(self.k_factor.is_finite() && self.k_factor > 0.0) {
      return Err(ValidationError::InvalidValue {
        field:  "k_factor",
        reason: format!("{} is not a positive number", self.k_factor),
      });
    }
    Ok(())
  }
}

// ─── Elo arithmetic ──────────────────────────────────────────────────────────

/// Probability that an animal rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
  1.0 / (1.0 + 10f64.powf((opponent - rating) / ELO_SCALE))
}

/// Winner and loser ratings after one contest.
fn elo_step(winner: f64, loser: f64, k_factor: f64) -> (f64, f64) {
  let expected_winner = expected_score(winner, loser);
  let expected_loser = 1.0 - expected_winner;
  (
    winner + k_factor * (1.0 - expected_winner),
    loser + k_factor * (0.0 - expected_loser),
  )
}

/// The two ratings touched by a single dyadic event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingPair {
  pub actor:  f64,
  pub target: f64,
}

/// Incremental update: apply one contest to the actor's and target's current
/// ratings. O(1); touches nothing else.
pub fn apply_rank_update(
  current: RatingPair,
  outcome: Outcome,
  k_factor: f64,
) -> RatingPair {
  match outcome {
    Outcome::ActorWins => {
      let (actor, target) = elo_step(current.actor, current.target, k_factor);
      RatingPair { actor, target }
    }
    Outcome::TargetWins => {
      let (target, actor) = elo_step(current.target, current.actor, k_factor);
      RatingPair { actor, target }
    }
  }
}

// ─── Replay ──────────────────────────────────────────────────────────────────

/// One animal's rating immediately before and after a contest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingPoint {
  pub at:     DateTime<Utc>,
  pub before: f64,
  pub after:  f64,
}

impl RatingPoint {
  pub fn delta(&self) -> f64 { self.after - self.before }
}

/// Per-animal rating history, in replay order.
pub type Trajectories = BTreeMap<AnimalId, Vec<RatingPoint>>;

/// Dominance contests in replay order. Fails on the first self-interaction.
pub fn contests(events: &[BehaviorEvent]) -> Result<Vec<Contest>, ValidationError> {
  let mut ordered: Vec<&BehaviorEvent> = events.iter().collect();
  ordered.sort_by(|a, b| BehaviorEvent::chronological(a, b));

  let mut out = Vec::new();
  for event in ordered {
    if let Some(contest) = event.contest()? {
      out.push(contest);
    }
  }
  Ok(out)
}

fn replay<F>(
  events: &[BehaviorEvent],
  initial_rating: f64,
  k_factor: f64,
  mut observe: F,
) -> Result<Ratings, ValidationError>
where
  F: FnMut(&Contest, (f64, f64), (f64, f64)),
{
  let mut ratings = Ratings::new();
  for contest in contests(events)? {
    let winner = *ratings.get(&contest.winner).unwrap_or(&initial_rating);
    let loser = *ratings.get(&contest.loser).unwrap_or(&initial_rating);
    let (new_winner, new_loser) = elo_step(winner, loser, k_factor);

    observe(&contest, (winner, loser), (new_winner, new_loser));

    ratings.insert(contest.winner, new_winner);
    ratings.insert(contest.loser, new_loser);
  }
  Ok(ratings)
}

/// Full recompute: replay every dominance-relevant event from
/// `initial_rating`. Deterministic regardless of input order.
pub fn recompute_ranks(
  events: &[BehaviorEvent],
  initial_rating: f64,
  k_factor: f64,
) -> Result<Ratings, ValidationError> {
  replay(events, initial_rating, k_factor, |_, _, _| {})
}

/// Like [`recompute_ranks`] but also records every animal's rating history.
pub fn rating_trajectory(
  events: &[BehaviorEvent],
  config: &EloConfig,
) -> Result<(Ratings, Trajectories), ValidationError> {
  let mut trajectories = Trajectories::new();
  let ratings = replay(
    events,
    config.initial_rating,
    config.k_factor,
    |contest, (winner, loser), (new_winner, new_loser)| {
      trajectories.entry(contest.winner.clone()).or_default().push(
        RatingPoint { at: contest.at, before: winner, after: new_winner },
      );
      trajectories.entry(contest.loser.clone()).or_default().push(
        RatingPoint { at: contest.at, before: loser, after: new_loser },
      );
    },
  )?;
  Ok((ratings, trajectories))
}

// ─── Dominance index ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DominanceRecord {
  pub wins:   u32,
  pub losses: u32,
}

impl DominanceRecord {
  /// `(wins - losses) / (wins + losses)`, in `[-1, 1]`.
  pub fn index(&self) -> f64 {
    let total = self.wins + self.losses;
    if total == 0 {
      0.0
    } else {
      (f64::from(self.wins) - f64::from(self.losses)) / f64::from(total)
    }
  }
}

/// Win/loss tallies per animal over all dominance contests.
pub fn dominance_index(
  events: &[BehaviorEvent],
) -> Result<BTreeMap<AnimalId, DominanceRecord>, ValidationError> {
  let mut records: BTreeMap<AnimalId, DominanceRecord> = BTreeMap::new();
  for contest in contests(events)? {
    records.entry(contest.winner).or_default().wins += 1;
    records.entry(contest.loser).or_default().losses += 1;
  }
  Ok(records)
}

// ─── Overrides ───────────────────────────────────────────────────────────────

/// What a recompute does with manually overridden ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverridePolicy {
  /// Leave manual ranks untouched.
  #[default]
  Preserve,
  /// Overwrite manual ranks with the computed value.
  Replace,
}

/// The rank to persist after a recompute, or `None` when the stored rank
/// should stay as it is.
pub fn merge_recomputed(
  current: &Rank,
  computed: f64,
  policy: OverridePolicy,
  now: DateTime<Utc>,
) -> Option<Rank> {
  if current.is_manual() {
    return match policy {
      OverridePolicy::Preserve => None,
      OverridePolicy::Replace => Some(Rank::computed(computed, now)),
    };
  }
  if current.value == computed {
    return None;
  }
  Some(Rank::computed(computed, now))
}
