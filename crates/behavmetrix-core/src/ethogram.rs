//! The fixed ethogram vocabulary observers log against.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Which side of a dyadic contest won, from the actor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  ActorWins,
  TargetWins,
}

/// One behavior from the ethogram. The snake_case name is the value stored in
/// the `behavior` column.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BehaviorKind {
  Grooming,
  Aggression,
  Displacement,
  Submission,
  SelfDirected,
  Stereotypy,
  Play,
  Foraging,
  Vocalization,
}

impl BehaviorKind {
  /// The contest outcome this behavior encodes, if it is dominance-relevant.
  ///
  /// Aggression and displacement are won by the actor; a submission is won by
  /// the animal being submitted to.
  pub fn dominance_outcome(self) -> Option<Outcome> {
    match self {
      Self::Aggression | Self::Displacement => Some(Outcome::ActorWins),
      Self::Submission => Some(Outcome::TargetWins),
      _ => None,
    }
  }

  /// Behaviors that make no sense without a recipient.
  pub fn requires_target(self) -> bool { self.dominance_outcome().is_some() }

  /// Behaviors counted against the animal by the behavior alert channel.
  pub fn is_concerning(self) -> bool {
    matches!(self, Self::SelfDirected | Self::Stereotypy | Self::Aggression)
  }
}

/// One row of the published ethogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthogramEntry {
  pub behavior:        BehaviorKind,
  pub requires_target: bool,
  pub dominance:       Option<Outcome>,
  pub concerning:      bool,
}

/// Every behavior with its properties, in declaration order.
pub fn catalogue() -> Vec<EthogramEntry> {
  BehaviorKind::iter()
    .map(|behavior| EthogramEntry {
      behavior,
      requires_target: behavior.requires_target(),
      dominance: behavior.dominance_outcome(),
      concerning: behavior.is_concerning(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use super::*;

  #[test]
  fn names_round_trip_through_strings() {
    for kind in BehaviorKind::iter() {
      let name = kind.to_string();
      assert_eq!(BehaviorKind::from_str(&name).unwrap(), kind);
    }
    assert_eq!(BehaviorKind::SelfDirected.to_string(), "self_directed");
  }

  #[test]
  fn submission_is_won_by_target() {
    assert_eq!(
      BehaviorKind::Submission.dominance_outcome(),
      Some(Outcome::TargetWins)
    );
    assert_eq!(
      BehaviorKind::Aggression.dominance_outcome(),
      Some(Outcome::ActorWins)
    );
    assert_eq!(BehaviorKind::Grooming.dominance_outcome(), None);
  }

  #[test]
  fn unknown_behavior_is_rejected() {
    assert!(BehaviorKind::from_str("juggling").is_err());
  }

  #[test]
  fn catalogue_lists_every_behavior_once() {
    let entries = catalogue();
    assert_eq!(entries.len(), BehaviorKind::iter().count());

    let submission = entries
      .iter()
      .find(|e| e.behavior == BehaviorKind::Submission)
      .unwrap();
    assert!(submission.requires_target);
    assert_eq!(submission.dominance, Some(Outcome::TargetWins));
    assert!(!submission.concerning);

    let stereotypy = entries
      .iter()
      .find(|e| e.behavior == BehaviorKind::Stereotypy)
      .unwrap();
    assert!(!stereotypy.requires_target);
    assert!(stereotypy.concerning);
  }
}
