//! ETL endpoint handlers
//!
//! Thin request parsing and response shaping over the pipeline crate:
//! batch extraction, definitions extraction, transform-and-load, and the
//! two-phase full pipeline.

use crate::handlers::{ApiResponse, EtlRequest};
use crate::AppState;
use axum::{extract::State, Json};
use qualtrics_etl_common::errors::Result;
use qualtrics_etl_pipeline::results::{
    DefinitionsBatchResult, ExtractBatchResult, PipelineReport, TransformBatchResult,
};
use tracing::info;

/// `POST /api/extract-data` - batch response extraction
pub async fn extract_data(
    State(state): State<AppState>,
    body: Option<Json<EtlRequest>>,
) -> Result<Json<ApiResponse<ExtractBatchResult>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(survey_ids = ?request.survey_ids, "Extract data requested");

    let extraction = state.extraction();
    let result = match &request.survey_ids {
        Some(ids) => extraction.extract_specific_surveys(ids).await?,
        None => extraction.extract_all_surveys(request.organisation_id).await?,
    };

    Ok(ApiResponse::ok(result))
}

/// `POST /api/extract-definitions` - batch definitions extraction
pub async fn extract_definitions(
    State(state): State<AppState>,
    body: Option<Json<EtlRequest>>,
) -> Result<Json<ApiResponse<DefinitionsBatchResult>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(survey_ids = ?request.survey_ids, "Extract definitions requested");

    let extraction = state.extraction();
    let result = match &request.survey_ids {
        Some(ids) => extraction.extract_specific_surveys_definitions(ids).await?,
        None => {
            extraction
                .extract_all_surveys_definitions(request.organisation_id)
                .await?
        }
    };

    Ok(ApiResponse::ok(result))
}

/// `POST /api/transform-and-load` - batch transform and load
pub async fn transform_and_load(
    State(state): State<AppState>,
    body: Option<Json<EtlRequest>>,
) -> Result<Json<ApiResponse<TransformBatchResult>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(
        survey_ids = ?request.survey_ids,
        force_mappings_update = request.force_mappings_update,
        "Transform and load requested"
    );

    let coordinator = state.coordinator();
    let result = match &request.survey_ids {
        Some(ids) => {
            coordinator
                .transform_specific_surveys(ids, request.force_mappings_update)
                .await?
        }
        None => {
            coordinator
                .transform_all_surveys(request.organisation_id, request.force_mappings_update)
                .await?
        }
    };

    Ok(ApiResponse::ok(result))
}

/// `POST /api/full-pipeline` - extract everything, then transform and load
pub async fn full_pipeline(
    State(state): State<AppState>,
    body: Option<Json<EtlRequest>>,
) -> Result<Json<ApiResponse<PipelineReport>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(survey_ids = ?request.survey_ids, "Full pipeline requested");

    let report = state
        .coordinator()
        .full_pipeline(
            request.survey_ids,
            request.organisation_id,
            request.force_mappings_update,
        )
        .await?;

    Ok(ApiResponse::ok(report))
}
