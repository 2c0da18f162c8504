//! Health check handler

use crate::handlers::ApiResponse;
use crate::AppState;
use axum::{extract::State, Json};
use qualtrics_etl_common::errors::Result;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthData {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Database reachability probe
///
/// An unreachable database surfaces as the 503 failure envelope.
pub async fn health(State(state): State<AppState>) -> Result<Json<ApiResponse<HealthData>>> {
    state.db.ping().await?;

    Ok(ApiResponse::ok(HealthData {
        status: "healthy".to_string(),
        service: state.config.observability.service_name.clone(),
        version: qualtrics_etl_common::VERSION.to_string(),
    }))
}
