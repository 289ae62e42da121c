//! Engine configuration, deserialised from the `[engine]` table of the server
//! config. Every field has a default, so an empty table is valid.

use serde::{Deserialize, Serialize};

use crate::{alert::AlertThresholds, error::ValidationError, rank::EloConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub elo:    EloConfig,
  pub alerts: AlertThresholds,
}

impl EngineConfig {
  pub fn validate(&self) -> Result<(), ValidationError> {
    self.elo.validate()?;
    self.alerts.validate()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    alert::Window,
    rank::{DEFAULT_INITIAL_RATING, DEFAULT_K_FACTOR},
  };

  #[test]
  fn empty_table_uses_defaults() {
    let config: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.elo.initial_rating, DEFAULT_INITIAL_RATING);
    assert_eq!(config.elo.k_factor, DEFAULT_K_FACTOR);
    assert_eq!(config.alerts.window, Window::Days { days: 14 });
    assert!(config.validate().is_ok());
  }

  #[test]
  fn partial_tables_merge_with_defaults() {
    let config: EngineConfig = serde_json::from_str(
      r#"{
        "elo": { "k_factor": 24 },
        "alerts": {
          "window": { "kind": "observations", "count": 20 },
          "stress": { "yellow": 50, "red": 70 }
        }
      }"#,
    )
    .unwrap();
    assert_eq!(config.elo.k_factor, 24.0);
    assert_eq!(config.elo.initial_rating, DEFAULT_INITIAL_RATING);
    assert_eq!(config.alerts.window, Window::Observations { count: 20 });
    assert_eq!(config.alerts.stress.red, 70.0);
    assert_eq!(config.alerts.behavior.red, 0.5);
  }
}
