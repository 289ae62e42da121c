//! Observation session endpoints.
//!
//! | Method | Path             | Notes                                     |
//! |--------|------------------|-------------------------------------------|
//! | GET    | `/sessions`      | `?limit=` (default 20); newest first      |
//! | POST   | `/sessions`      | Body: `NewSession`; 201                   |
//! | GET    | `/sessions/{id}` | Session plus its behavior events          |
//! | PATCH  | `/sessions/{id}` | Body: `CloseSession`; closes it, 400 twice|

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use behavmetrix_core::{
  session::{CloseSession, NewSession, ObservationSession, SessionDetail},
  store::ColonyStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{Service, error::ApiError};

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub limit: Option<usize>,
}

// ─── List ────────────────────────────────────────────────────────────────────

pub async fn list<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ObservationSession>>, ApiError> {
  let mut sessions = service
    .sessions(Some(params.limit.unwrap_or(DEFAULT_LIMIT)))
    .await?;
  sessions.reverse();
  Ok(Json(sessions))
}

// ─── Get ─────────────────────────────────────────────────────────────────────

pub async fn get_one<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionDetail>, ApiError> {
  Ok(Json(service.session(id).await?))
}

// ─── Open / close ────────────────────────────────────────────────────────────

pub async fn open<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(input): Json<NewSession>,
) -> Result<(StatusCode, Json<ObservationSession>), ApiError> {
  let session = service.open_session(input).await?;
  Ok((StatusCode::CREATED, Json(session)))
}

pub async fn close<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Path(id): Path<Uuid>,
  Json(input): Json<CloseSession>,
) -> Result<Json<ObservationSession>, ApiError> {
  Ok(Json(service.close_session(id, input).await?))
}
