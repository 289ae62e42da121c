//! Welfare alert and dashboard endpoints.
//!
//! | Method | Path                 | Notes                                   |
//! |--------|----------------------|-----------------------------------------|
//! | GET    | `/alerts`            | Evaluates every active animal           |
//! | GET    | `/alerts/{id}`       | Evaluates one animal; 404 if missing    |
//! | GET    | `/dashboard/summary` | Colony stats plus one row per animal    |
//!
//! Evaluating persists any changed welfare flag.

use axum::{
  Json,
  extract::{Path, State},
};
use behavmetrix_core::{
  alert::AlertEvaluation,
  animal::AnimalId,
  service::ColonyEvaluation,
  stats::DashboardSummary,
  store::ColonyStore,
};

use crate::{Service, error::ApiError};

pub async fn colony<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
) -> Result<Json<ColonyEvaluation>, ApiError> {
  Ok(Json(service.evaluate_colony().await?))
}

pub async fn animal<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Path(id): Path<AnimalId>,
) -> Result<Json<AlertEvaluation>, ApiError> {
  Ok(Json(service.evaluate_animal(&id).await?))
}

pub async fn dashboard<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
) -> Result<Json<DashboardSummary>, ApiError> {
  Ok(Json(service.dashboard().await?))
}
