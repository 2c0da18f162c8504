//! Service status handler

use crate::handlers::ApiResponse;
use crate::AppState;
use axum::{extract::State, Json};
use qualtrics_etl_common::db::{ExtractionLog, Repository};
use serde::Serialize;
use tracing::warn;

/// Extraction log entries shown on the status page
const RECENT_LOG_LIMIT: u64 = 10;

#[derive(Serialize)]
pub struct StatusData {
    pub survey_count: u64,
    pub survey_ids: Vec<String>,
    pub recent_extractions: Vec<ExtractionLog>,
    pub configuration: ConfigEcho,
}

#[derive(Serialize)]
pub struct ConfigEcho {
    pub data_center: String,
    pub data_dir: String,
    pub app_version: String,
}

/// `GET /api/status` - survey counts, recent extractions, configuration echo
///
/// Individual sections degrade to empty values with a warning rather than
/// failing the endpoint.
pub async fn status(State(state): State<AppState>) -> Json<ApiResponse<StatusData>> {
    let repository = Repository::new(state.db.clone());

    let survey_count = repository.count_distinct_surveys().await.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to count surveys for status");
        0
    });

    let survey_ids = repository.list_survey_ids().await.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to list survey ids for status");
        Vec::new()
    });

    let recent_extractions = repository
        .recent_extraction_logs(RECENT_LOG_LIMIT)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read extraction log for status");
            Vec::new()
        });

    ApiResponse::ok(StatusData {
        survey_count,
        survey_ids,
        recent_extractions,
        configuration: ConfigEcho {
            data_center: state.config.qualtrics.data_center.clone(),
            data_dir: state.config.storage.data_dir.display().to_string(),
            app_version: qualtrics_etl_common::VERSION.to_string(),
        },
    })
}
