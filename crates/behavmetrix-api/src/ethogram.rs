//! `GET /ethogram`: the behavior vocabulary with the properties the rank and
//! alert engines read from it.

use axum::Json;
use behavmetrix_core::ethogram::{self, EthogramEntry};

pub async fn catalogue() -> Json<Vec<EthogramEntry>> { Json(ethogram::catalogue()) }
