//! JSON REST API for BehavMetrix.
//!
//! Exposes an axum [`Router`] backed by a [`WelfareService`] over any
//! [`ColonyStore`]. Auth, TLS, and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", behavmetrix_api::api_router(service.clone()))
//! ```

pub mod alerts;
pub mod animals;
pub mod behaviors;
pub mod error;
pub mod ethogram;
pub mod incidents;
pub mod observations;
pub mod ranks;
pub mod sessions;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, post},
};
use behavmetrix_core::{service::WelfareService, store::ColonyStore};

pub use error::ApiError;

/// Handler state: the service every route runs through.
pub type Service<S> = Arc<WelfareService<S>>;

/// Build the API router for `service`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(service: Service<S>) -> Router<()>
where
  S: ColonyStore + 'static,
{
  Router::new()
    // Roster
    .route("/animals", get(animals::list::<S>).post(animals::create::<S>))
    .route("/animals/import", post(animals::import::<S>))
    .route("/animals/{id}", get(animals::get_one::<S>).patch(animals::update::<S>))
    .route("/animals/{id}/deactivate", post(animals::deactivate::<S>))
    // Observation logs
    .route("/behaviors", get(behaviors::list::<S>).post(behaviors::create::<S>))
    .route("/behaviors/batch", post(behaviors::create_batch::<S>))
    .route("/stress", get(observations::list_stress::<S>).post(observations::create_stress::<S>))
    .route("/stress/signs", post(observations::create_stress_signs::<S>))
    .route(
      "/enrichment",
      get(observations::list_enrichment::<S>).post(observations::create_enrichment::<S>),
    )
    .route("/incidents", get(incidents::list::<S>).post(incidents::create::<S>))
    .route("/ethogram", get(ethogram::catalogue))
    // Sessions
    .route("/sessions", get(sessions::list::<S>).post(sessions::open::<S>))
    .route("/sessions/{id}", get(sessions::get_one::<S>).patch(sessions::close::<S>))
    // Ranks
    .route("/ranks", get(ranks::list::<S>))
    .route("/ranks/recompute", post(ranks::recompute::<S>))
    .route("/ranks/overrides", post(ranks::set_overrides::<S>))
    .route("/ranks/overrides/{id}", delete(ranks::clear_override::<S>))
    // Alerts
    .route("/alerts", get(alerts::colony::<S>))
    .route("/alerts/{id}", get(alerts::animal::<S>))
    .route("/dashboard/summary", get(alerts::dashboard::<S>))
    .with_state(service)
}
