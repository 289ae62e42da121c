//! HTTP server for BehavMetrix.
//!
//! Wraps the JSON API from [`behavmetrix_api`] under `/api`, adds a health
//! check and request tracing. The binary in `main.rs` wires it to a SQLite
//! store.

use std::{path::PathBuf, sync::Arc};

use axum::{Router, routing::get};
use behavmetrix_core::{config::EngineConfig, service::WelfareService, store::ColonyStore};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("behavmetrix.db") }

/// Runtime server configuration, deserialised from `config.toml` and
/// `BEHAVMETRIX_*` environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  /// Elo and alert tuning. Every field is optional.
  #[serde(default)]
  pub engine:     EngineConfig,
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the application [`Router`].
pub fn router<S>(service: Arc<WelfareService<S>>) -> Router
where
  S: ColonyStore + 'static,
{
  Router::new()
    .route("/health", get(health))
    .nest("/api", behavmetrix_api::api_router(service))
    .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str { "ok" }
