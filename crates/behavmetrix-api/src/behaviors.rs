//! Behavior log endpoints.
//!
//! | Method | Path               | Notes                                      |
//! |--------|--------------------|--------------------------------------------|
//! | GET    | `/behaviors`       | `?animal_id=&since=&limit=` (default 50)   |
//! | POST   | `/behaviors`       | Body: `NewBehaviorEvent`; 201              |
//! | POST   | `/behaviors/batch` | Body: `[NewBehaviorEvent]`; all or nothing |
//!
//! A batch is validated in full and appended in one store transaction, so a
//! rejected batch stores nothing. Dominance-relevant events update the cached
//! ranks before the response is sent. An event may name an open observation
//! session with `session_id`.

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
};
use behavmetrix_core::{
  log::{BehaviorEvent, NewBehaviorEvent},
  store::{ColonyStore, LogQuery},
};

use crate::{Service, error::ApiError, observations::LogParams};

/// Page size when `limit` is not given.
const DEFAULT_LIMIT: usize = 50;

// ─── List ────────────────────────────────────────────────────────────────────

pub async fn list<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Query(params): Query<LogParams>,
) -> Result<Json<Vec<BehaviorEvent>>, ApiError> {
  let mut query = LogQuery::from(params);
  query.limit.get_or_insert(DEFAULT_LIMIT);
  let mut events = service.behaviors(query).await?;
  // Newest first for display.
  events.reverse();
  Ok(Json(events))
}

// ─── Create ──────────────────────────────────────────────────────────────────

pub async fn create<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(input): Json<NewBehaviorEvent>,
) -> Result<(StatusCode, Json<BehaviorEvent>), ApiError> {
  let event = service.log_behavior(input).await?;
  Ok((StatusCode::CREATED, Json(event)))
}

pub async fn create_batch<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(batch): Json<Vec<NewBehaviorEvent>>,
) -> Result<(StatusCode, Json<Vec<BehaviorEvent>>), ApiError> {
  if batch.is_empty() {
    return Err(ApiError::BadRequest("batch is empty".into()));
  }
  let events = service.log_behaviors(batch).await?;
  Ok((StatusCode::CREATED, Json(events)))
}
