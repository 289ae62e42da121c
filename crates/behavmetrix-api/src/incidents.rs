//! Incident report endpoints.
//!
//! | Method | Path         | Notes                                    |
//! |--------|--------------|------------------------------------------|
//! | GET    | `/incidents` | `?animal_id=&since=&limit=` (default 40) |
//! | POST   | `/incidents` | Body: `NewIncident`; 201                 |

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
};
use behavmetrix_core::{
  log::{Incident, NewIncident},
  store::{ColonyStore, LogQuery},
};

use crate::{Service, error::ApiError, observations::LogParams};

const DEFAULT_LIMIT: usize = 40;

pub async fn list<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Query(params): Query<LogParams>,
) -> Result<Json<Vec<Incident>>, ApiError> {
  let mut query = LogQuery::from(params);
  query.limit.get_or_insert(DEFAULT_LIMIT);
  let mut incidents = service.incidents(query).await?;
  incidents.reverse();
  Ok(Json(incidents))
}

pub async fn create<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(input): Json<NewIncident>,
) -> Result<(StatusCode, Json<Incident>), ApiError> {
  let incident = service.log_incident(input).await?;
  Ok((StatusCode::CREATED, Json(incident)))
}
