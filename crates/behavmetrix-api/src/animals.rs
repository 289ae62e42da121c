//! Roster endpoints.
//!
//! | Method | Path                        | Notes                                  |
//! |--------|-----------------------------|----------------------------------------|
//! | GET    | `/animals`                  | `?cage=&sex=&search=&include_inactive=`|
//! | POST   | `/animals`                  | Body: `NewAnimal`; 201                 |
//! | POST   | `/animals/import`           | Body: `[NewAnimal]`; upsert by id      |
//! | GET    | `/animals/{id}`             | 404 if missing                         |
//! | PATCH  | `/animals/{id}`             | Body: `AnimalPatch`                    |
//! | POST   | `/animals/{id}/deactivate`  | Keeps history, leaves the rank table   |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use behavmetrix_core::{
  animal::{Animal, AnimalId, AnimalPatch, NewAnimal},
  store::{AnimalQuery, ColonyStore},
};

use crate::{Service, error::ApiError};

// ─── List ────────────────────────────────────────────────────────────────────

pub async fn list<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Query(query): Query<AnimalQuery>,
) -> Result<Json<Vec<Animal>>, ApiError> {
  Ok(Json(service.animals(query).await?))
}

// ─── Get ─────────────────────────────────────────────────────────────────────

pub async fn get_one<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Path(id): Path<AnimalId>,
) -> Result<Json<Animal>, ApiError> {
  Ok(Json(service.animal(&id).await?))
}

// ─── Create ──────────────────────────────────────────────────────────────────

pub async fn create<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(input): Json<NewAnimal>,
) -> Result<(StatusCode, Json<Animal>), ApiError> {
  let animal = service.add_animal(input).await?;
  Ok((StatusCode::CREATED, Json(animal)))
}

pub async fn import<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Json(rows): Json<Vec<NewAnimal>>,
) -> Result<Json<Vec<Animal>>, ApiError> {
  Ok(Json(service.import_roster(rows).await?))
}

// ─── Update ──────────────────────────────────────────────────────────────────

pub async fn update<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Path(id): Path<AnimalId>,
  Json(patch): Json<AnimalPatch>,
) -> Result<Json<Animal>, ApiError> {
  Ok(Json(service.update_animal(&id, patch).await?))
}

// ─── Deactivate ──────────────────────────────────────────────────────────────

pub async fn deactivate<S: ColonyStore + 'static>(
  State(service): State<Service<S>>,
  Path(id): Path<AnimalId>,
) -> Result<Json<Animal>, ApiError> {
  Ok(Json(service.deactivate(&id).await?))
}
