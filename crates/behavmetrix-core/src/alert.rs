//! Alert engine: welfare flags and rank-instability messages.
//!
//! Each animal is scored on three channels over a trailing window. A channel
//! without enough observations is reported as insufficient and takes no part
//! in escalation; when every channel is insufficient there is no flag at all
//! and the previously stored flag stands.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
  animal::AnimalId,
  error::ValidationError,
  log::{BehaviorEvent, EnrichmentLog, StressLog},
  rank::RatingPoint,
};

// ─── Flags ───────────────────────────────────────────────────────────────────

/// Welfare flag, ordered by severity.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WelfareFlag {
  Green,
  Yellow,
  Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
  /// Mean stress-indicator value.
  Stress,
  /// Share of the animal's own behaviors that are self-directed, stereotypic
  /// or aggressive.
  Behavior,
  /// Frequency-weighted engagement with enrichment items.
  Enrichment,
}

impl Channel {
  /// Whether a larger metric is worse for this channel.
  fn higher_is_worse(self) -> bool { !matches!(self, Self::Enrichment) }
}

// ─── Thresholds ──────────────────────────────────────────────────────────────

/// Longest trailing window accepted, in days. Keeps window arithmetic on
/// timestamps in range.
pub const MAX_WINDOW_DAYS: i64 = 36_525;

/// The trailing window a channel is aggregated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Window {
  /// Everything observed in the last `days` days.
  Days { days: i64 },
  /// The most recent `count` observations per channel.
  Observations { count: usize },
}

impl Default for Window {
  fn default() -> Self { Self::Days { days: 14 } }
}

impl Window {
  /// Earliest timestamp the store needs to return, if the window is
  /// time-bounded.
  pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match self {
      Self::Days { days } => Some(now - Duration::days(*days)),
      Self::Observations { .. } => None,
    }
  }

  fn trim<T>(
    &self,
    mut items: Vec<T>,
    now: DateTime<Utc>,
    at: impl Fn(&T) -> DateTime<Utc>,
  ) -> Vec<T> {
    items.retain(|item| at(item) <= now);
    items.sort_by_key(|item| at(item));
    match self {
      Self::Days { days } => {
        let cutoff = now - Duration::days(*days);
        items.retain(|item| at(item) >= cutoff);
        items
      }
      Self::Observations { count } => {
        let skip = items.len().saturating_sub(*count);
        items.split_off(skip)
      }
    }
  }
}

/// Cutoffs for one channel. For channels where lower is worse (enrichment),
/// `red` sits below `yellow`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCutoffs {
  pub yellow: f64,
  pub red:    f64,
}

impl ChannelCutoffs {
  fn classify(&self, value: f64, higher_is_worse: bool) -> WelfareFlag {
    let worse_or_equal = |cutoff: f64| {
      if higher_is_worse { value >= cutoff } else { value <= cutoff }
    };
    if worse_or_equal(self.red) {
      WelfareFlag::Red
    } else if worse_or_equal(self.yellow) {
      WelfareFlag::Yellow
    } else {
      WelfareFlag::Green
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstabilityConfig {
  /// Rating change, in Elo points, that counts as sudden.
  pub max_delta:    f64,
  pub window_hours: i64,
}

impl Default for InstabilityConfig {
  fn default() -> Self { Self { max_delta: 50.0, window_hours: 24 } }
}

/// Facility-tunable alert configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
  pub window:           Window,
  /// Readings a channel needs before it can escalate.
  pub min_observations: usize,
  pub stress:           ChannelCutoffs,
  pub behavior:         ChannelCutoffs,
  pub enrichment:       ChannelCutoffs,
  pub instability:      InstabilityConfig,
}

impl Default for AlertThresholds {
  fn default() -> Self {
    Self {
      window:           Window::default(),
      min_observations: 1,
      stress:           ChannelCutoffs { yellow: 4.0, red: 8.0 },
      behavior:         ChannelCutoffs { yellow: 0.25, red: 0.5 },
      enrichment:       ChannelCutoffs { yellow: 0.5, red: 0.25 },
      instability:      InstabilityConfig::default(),
    }
  }
}

impl AlertThresholds {
  pub fn cutoffs(&self, channel: Channel) -> &ChannelCutoffs {
    match channel {
      Channel::Stress => &self.stress,
      Channel::Behavior => &self.behavior,
      Channel::Enrichment => &self.enrichment,
    }
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    match self.window {
      Window::Days { days } if !(1..=MAX_WINDOW_DAYS).contains(&days) => {
        return Err(ValidationError::InvalidValue {
          field:  "window.days",
          reason: format!("{days} is outside 1..={MAX_WINDOW_DAYS}"),
        });
      }
      Window::Observations { count: 0 } => {
        return Err(ValidationError::InvalidValue {
          field:  "window.count",
          reason: "must be positive".into(),
        });
      }
      _ => {}
    }
    for channel in [Channel::Stress, Channel::Behavior, Channel::Enrichment] {
      let c = self.cutoffs(channel);
      let ordered = if channel.higher_is_worse() {
        c.red >= c.yellow
      } else {
        c.red <= c.yellow
      };
      if !ordered {
        return Err(ValidationError::InvalidValue {
          field:  "cutoffs",
          reason: format!("{channel:?} red cutoff is less severe than yellow"),
        });
      }
    }
    let InstabilityConfig { max_delta, window_hours } = self.instability;
    if !(1..=MAX_WINDOW_DAYS * 24).contains(&window_hours) {
      return Err(ValidationError::InvalidValue {
        field:  "instability.window_hours",
        reason: format!("{window_hours} is outside 1..={}", MAX_WINDOW_DAYS * 24),
      });
    }
    if !(max_delta.is_finite() && max_delta > 0.0) {
      return Err(ValidationError::InvalidValue {
        field:  "instability.max_delta",
        reason: "must be a positive number".into(),
      });
    }
    Ok(())
  }
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Everything the engine looks at for one animal.
#[derive(Debug, Clone, Default)]
pub struct WindowLogs {
  pub stress:     Vec<StressLog>,
  pub behavior:   Vec<BehaviorEvent>,
  pub enrichment: Vec<EnrichmentLog>,
  /// The animal's rating history from the rank engine.
  pub ratings:    Vec<RatingPoint>,
}

impl WindowLogs {
  /// Keep only `animal`'s entries inside `window`, ending at `now`.
  ///
  /// Behavior events count toward an animal only when it is the actor.
  pub fn trailing(self, animal: &AnimalId, window: Window, now: DateTime<Utc>) -> Self {
    let stress = self
      .stress
      .into_iter()
      .filter(|l| &l.animal_id == animal)
      .collect();
    let behavior = self
      .behavior
      .into_iter()
      .filter(|e| &e.actor_id == animal)
      .collect();
    let enrichment = self
      .enrichment
      .into_iter()
      .filter(|l| &l.animal_id == animal)
      .collect();

    Self {
      stress:     window.trim(stress, now, |l: &StressLog| l.observed_at),
      behavior:   window.trim(behavior, now, |e: &BehaviorEvent| e.observed_at),
      enrichment: window.trim(enrichment, now, |l: &EnrichmentLog| l.observed_at),
      ratings:    window.trim(self.ratings, now, |p: &RatingPoint| p.at),
    }
  }
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelStatus {
  Evaluated {
    value:        f64,
    observations: usize,
    flag:         WelfareFlag,
  },
  InsufficientData {
    observations: usize,
  },
}

impl ChannelStatus {
  pub fn flag(&self) -> Option<WelfareFlag> {
    match self {
      Self::Evaluated { flag, .. } => Some(*flag),
      Self::InsufficientData { .. } => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
  pub channel: Channel,
  #[serde(flatten)]
  pub status:  ChannelStatus,
}

/// A standalone alert, separate from the flag colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
  pub animal_id: AnimalId,
  pub message:   String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvaluation {
  pub animal_id: AnimalId,
  /// `None` when no channel had enough data.
  pub flag:      Option<WelfareFlag>,
  pub channels:  Vec<ChannelReading>,
  pub messages:  Vec<AlertMessage>,
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

fn read_channel(
  channel: Channel,
  samples: &[(f64, f64)],
  thresholds: &AlertThresholds,
) -> ChannelReading {
  let observations = samples.len();
  let weight: f64 = samples.iter().map(|(_, w)| w).sum();

  let status = if observations < thresholds.min_observations.max(1) || weight <= 0.0 {
    ChannelStatus::InsufficientData { observations }
  } else {
    let value = samples.iter().map(|(v, w)| v * w).sum::<f64>() / weight;
    ChannelStatus::Evaluated {
      value,
      observations,
      flag: thresholds
        .cutoffs(channel)
        .classify(value, channel.higher_is_worse()),
    }
  };
  ChannelReading { channel, status }
}

/// Most severe flag among evaluated channels.
pub fn escalate<'a>(readings: impl IntoIterator<Item = &'a ChannelReading>) -> Option<WelfareFlag> {
  readings.into_iter().filter_map(|r| r.status.flag()).max()
}

/// The flag to store: a fresh evaluation wins, otherwise the prior stands.
pub fn resolve_flag(
  prior: Option<WelfareFlag>,
  evaluated: Option<WelfareFlag>,
) -> Option<WelfareFlag> {
  evaluated.or(prior)
}

/// Largest rating swing inside any `window_hours` span, reported if it
/// exceeds `max_delta`.
pub fn detect_instability(
  animal_id: &AnimalId,
  points: &[RatingPoint],
  config: &InstabilityConfig,
) -> Option<AlertMessage> {
  let span = Duration::hours(config.window_hours);
  let mut start = 0;
  let mut worst: Option<f64> = None;

  for point in points {
    while points[start].at < point.at - span {
      start += 1;
    }
    let delta = point.after - points[start].before;
    if worst.is_none_or(|w| delta.abs() > w.abs()) {
      worst = Some(delta);
    }
  }

  let delta = worst.filter(|d| d.abs() > config.max_delta)?;
  let direction = if delta > 0.0 { "increase" } else { "drop" };
  Some(AlertMessage {
    animal_id: animal_id.clone(),
    message:   format!(
      "Rapid rank {direction}: {delta:+.1} Elo within {}h",
      config.window_hours
    ),
  })
}

/// Evaluate one animal's windowed logs against `thresholds`.
pub fn evaluate_alerts(
  animal_id: &AnimalId,
  logs: &WindowLogs,
  thresholds: &AlertThresholds,
) -> AlertEvaluation {
  let stress: Vec<(f64, f64)> = logs
    .stress
    .iter()
    .filter(|l| &l.animal_id == animal_id)
    .map(|l| (l.value, 1.0))
    .collect();

  let behavior: Vec<(f64, f64)> = logs
    .behavior
    .iter()
    .filter(|e| &e.actor_id == animal_id)
    .map(|e| (if e.behavior.is_concerning() { 1.0 } else { 0.0 }, 1.0))
    .collect();

  let enrichment: Vec<(f64, f64)> = logs
    .enrichment
    .iter()
    .filter(|l| &l.animal_id == animal_id)
    .map(|l| (l.outcome.engagement(), f64::from(l.frequency)))
    .collect();

  let channels = vec![
    read_channel(Channel::Stress, &stress, thresholds),
    read_channel(Channel::Behavior, &behavior, thresholds),
    read_channel(Channel::Enrichment, &enrichment, thresholds),
  ];

  let messages =
    detect_instability(animal_id, &logs.ratings, &thresholds.instability)
      .into_iter()
      .collect();

  AlertEvaluation {
    animal_id: animal_id.clone(),
    flag: escalate(&channels),
    channels,
    messages,
  }
}
