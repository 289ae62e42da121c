//! Rank endpoints.
//!
//! | Method | Path                     | Notes                                  |
//! |--------|--------------------------|----------------------------------------|
//! | GET    | `/ranks`                 | Recomputes first if the cache is stale |
//! | POST   | `/ranks/recompute`       | Body: `{"replace_overrides": bool}`    |
//! | POST   | `/ranks/overrides`       | Body: `{"<animal_id>": value, ...}`    |
//! | DELETE | `/ranks/overrides/{id}`  | Back to the computed origin            |
//!
//! A write that loses every optimistic retry answers 409.

use std::collections::BTreeMap;

use axum::{
  Json,
  body::Bytes,
  extract::{Path, State},
};
use behavmetrix_core::{
  animal::{Animal, AnimalId},
  rank::OverridePolicy,
  service::RankEntry,
  store::ColonyStore,
};
use serde::Deserialize;

use crate::{Service, error::ApiError};

// ─── Read ────────────────────────────────────────────────────────────────────

pub async fn list<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
) -> Result<Json<Vec<RankEntry>>, ApiError> {
  Ok(Json(service.ranks().await?))
}

// ─── Recompute ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RecomputeBody {
  #[serde(default)]
  pub replace_overrides: bool,
}

impl RecomputeBody {
  fn policy(&self) -> OverridePolicy {
    if self.replace_overrides { OverridePolicy::Replace } else { OverridePolicy::Preserve }
  }
}

pub async fn recompute<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  body: Bytes,
) -> Result<Json<Vec<RankEntry>>, ApiError> {
  // An empty body keeps manual overrides.
  let body: RecomputeBody = if body.is_empty() {
    RecomputeBody::default()
  } else {
    serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
  };
  Ok(Json(service.recompute_ranks(body.policy()).await?))
}

// ─── Overrides ───────────────────────────────────────────────────────────────

pub async fn set_overrides<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(overrides): Json<BTreeMap<AnimalId, f64>>,
) -> Result<Json<Vec<Animal>>, ApiError> {
  Ok(Json(service.override_ranks(overrides).await?))
}

pub async fn clear_override<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Path(id): Path<AnimalId>,
) -> Result<Json<Animal>, ApiError> {
  Ok(Json(service.clear_override(&id).await?))
}
