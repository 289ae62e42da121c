//! Stress and enrichment log endpoints.
//!
//! | Method | Path            | Notes                                   |
//! |--------|-----------------|-----------------------------------------|
//! | GET    | `/stress`       | `?animal_id=&since=&limit=`             |
//! | POST   | `/stress`       | Body: `NewStressLog`; 201               |
//! | POST   | `/stress/signs` | Body: `StressSigns`; stored as composite|
//! | GET    | `/enrichment`   | `?animal_id=&since=&limit=`             |
//! | POST   | `/enrichment`   | Body: `NewEnrichmentLog`; 201           |

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
};
use behavmetrix_core::{
  animal::AnimalId,
  log::{EnrichmentLog, NewEnrichmentLog, NewStressLog, StressLog, StressSigns},
  store::{ColonyStore, LogQuery},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{Service, error::ApiError};

/// Query parameters shared by the log listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LogParams {
  pub animal_id: Option<AnimalId>,
  pub since:     Option<DateTime<Utc>>,
  pub limit:     Option<usize>,
}

impl From<LogParams> for LogQuery {
  fn from(p: LogParams) -> Self {
    LogQuery { animal_id: p.animal_id, since: p.since, limit: p.limit }
  }
}

// ─── Stress ──────────────────────────────────────────────────────────────────

pub async fn list_stress<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Query(params): Query<LogParams>,
) -> Result<Json<Vec<StressLog>>, ApiError> {
  Ok(Json(service.stress_logs(params.into()).await?))
}

pub async fn create_stress<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(input): Json<NewStressLog>,
) -> Result<(StatusCode, Json<StressLog>), ApiError> {
  let log = service.log_stress(input).await?;
  Ok((StatusCode::CREATED, Json(log)))
}

pub async fn create_stress_signs<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(signs): Json<StressSigns>,
) -> Result<(StatusCode, Json<StressLog>), ApiError> {
  let log = service.log_stress_signs(signs).await?;
  Ok((StatusCode::CREATED, Json(log)))
}

// ─── Enrichment ──────────────────────────────────────────────────────────────

pub async fn list_enrichment<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Query(params): Query<LogParams>,
) -> Result<Json<Vec<EnrichmentLog>>, ApiError> {
  Ok(Json(service.enrichment_logs(params.into()).await?))
}

pub async fn create_enrichment<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(input): Json<NewEnrichmentLog>,
) -> Result<(StatusCode, Json<EnrichmentLog>), ApiError> {
  let log = service.log_enrichment(input).await?;
  Ok((StatusCode::CREATED, Json(log)))
}
