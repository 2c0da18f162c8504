//! Pipeline coordinator
//!
//! Composes extraction, mapping derivation, response transformation, and
//! load per survey, aggregates per-survey and batch-level outcomes, and
//! runs the two-phase full pipeline with its phase-1 short-circuit.

use crate::extract::{DefinitionsExtract, ExtractionService, PollPolicy};
use crate::load::LoadService;
use crate::mappings::derive_field_mappings;
use crate::responses::{ResponseTransformer, TransformOutcome};
use crate::results::{
    BatchSummary, MappingsResult, PipelineReport, ResponsesResult, SurveyTransformResult,
    TransformBatchResult,
};
use qualtrics_etl_common::db::{DbPool, Repository};
use qualtrics_etl_common::errors::{AppError, Result};
use qualtrics_etl_common::qualtrics::QualtricsApi;
use qualtrics_etl_common::ExtractStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Pipeline coordinator
pub struct PipelineCoordinator {
    repository: Repository,
    extraction: ExtractionService,
    transformer: ResponseTransformer,
    loader: LoadService,
}

impl PipelineCoordinator {
    pub fn new(
        pool: DbPool,
        client: Arc<dyn QualtricsApi>,
        store: ExtractStore,
        poll: PollPolicy,
    ) -> Self {
        let repository = Repository::new(pool);

        Self {
            extraction: ExtractionService::new(
                repository.clone(),
                client,
                store.clone(),
                poll,
            ),
            transformer: ResponseTransformer::new(repository.clone(), store),
            loader: LoadService::new(repository.clone()),
            repository,
        }
    }

    /// The extraction orchestrator this coordinator drives
    pub fn extraction(&self) -> &ExtractionService {
        &self.extraction
    }

    // ========================================================================
    // Transform and Load
    // ========================================================================

    /// Transform and load every active survey, optionally organisation-scoped
    pub async fn transform_all_surveys(
        &self,
        organisation_id: Option<Uuid>,
        force_mappings_update: bool,
    ) -> Result<TransformBatchResult> {
        let ids = self
            .repository
            .list_active_survey_ids(organisation_id)
            .await?;
        if ids.is_empty() {
            return Err(AppError::NoSurveysFound);
        }

        Ok(self.transform_surveys(&ids, force_mappings_update).await)
    }

    /// Transform and load an explicit set of survey ids
    pub async fn transform_specific_surveys(
        &self,
        ids: &[String],
        force_mappings_update: bool,
    ) -> Result<TransformBatchResult> {
        if ids.is_empty() {
            return Err(AppError::Validation {
                message: "survey_ids must not be empty".to_string(),
                field: Some("survey_ids".to_string()),
            });
        }

        Ok(self.transform_surveys(ids, force_mappings_update).await)
    }

    /// Sequential per-survey processing with independent failure isolation
    async fn transform_surveys(
        &self,
        ids: &[String],
        force_mappings_update: bool,
    ) -> TransformBatchResult {
        let mut summary = BatchSummary::default();
        let mut surveys = BTreeMap::new();

        for survey_id in ids {
            let result = self.process_survey(survey_id, force_mappings_update).await;
            summary.record(result.success);
            surveys.insert(survey_id.clone(), result);
        }

        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "Batch transform-and-load complete"
        );

        TransformBatchResult { summary, surveys }
    }

    /// Run both tracks for one survey; a mapping failure does not block
    /// response processing, but overall success requires both.
    #[instrument(skip(self))]
    async fn process_survey(
        &self,
        survey_id: &str,
        force_mappings_update: bool,
    ) -> SurveyTransformResult {
        let mappings = match self.process_mappings(survey_id, force_mappings_update).await {
            Ok(result) => result,
            Err(e) => {
                error!(survey_id = %survey_id, error = %e, "Mapping processing failed");
                MappingsResult::Failed {
                    error: e.to_string(),
                }
            }
        };

        let responses = match self.process_responses(survey_id).await {
            Ok(result) => result,
            Err(e) => {
                error!(survey_id = %survey_id, error = %e, "Response processing failed");
                ResponsesResult::Failed {
                    error: e.to_string(),
                }
            }
        };

        SurveyTransformResult {
            success: mappings.succeeded() && responses.succeeded(),
            mappings,
            responses,
        }
    }

    /// Extract definitions if needed, derive the mapping tables, load them
    async fn process_mappings(
        &self,
        survey_id: &str,
        force_mappings_update: bool,
    ) -> Result<MappingsResult> {
        match self
            .extraction
            .extract_survey_definitions(survey_id, force_mappings_update)
            .await?
        {
            DefinitionsExtract::Skipped => Ok(MappingsResult::Skipped {
                reason: "mappings already exist".to_string(),
            }),
            DefinitionsExtract::Extracted(definitions) => {
                let derived = derive_field_mappings(&definitions.questions);
                self.loader
                    .load_survey_mappings(
                        survey_id,
                        &definitions.survey_name,
                        &derived,
                        force_mappings_update,
                    )
                    .await
            }
        }
    }

    /// Transform the latest extract and load the resulting rows
    async fn process_responses(&self, survey_id: &str) -> Result<ResponsesResult> {
        match self.transformer.transform_survey_responses(survey_id).await? {
            TransformOutcome::SkippedDuplicate { file_hash } => {
                Ok(ResponsesResult::SkippedDuplicate { file_hash })
            }
            TransformOutcome::Transformed {
                records,
                transformed,
                total_source,
            } => {
                let load = self
                    .loader
                    .load_survey_responses(survey_id, records, true)
                    .await?;

                Ok(ResponsesResult::Loaded {
                    deleted: load.deleted,
                    inserted: load.inserted,
                    total_source,
                    transformed,
                })
            }
        }
    }

    // ========================================================================
    // Full Pipeline
    // ========================================================================

    /// Two-phase pipeline: extract everything, then transform and load
    ///
    /// A failing extract phase skips the transform phase entirely and
    /// reports overall failure with the phase-1 detail attached.
    #[instrument(skip(self))]
    pub async fn full_pipeline(
        &self,
        survey_ids: Option<Vec<String>>,
        organisation_id: Option<Uuid>,
        force_mappings_update: bool,
    ) -> Result<PipelineReport> {
        info!("Starting full pipeline");

        let extract_phase = match &survey_ids {
            Some(ids) => self.extraction.extract_specific_surveys(ids).await?,
            None => self.extraction.extract_all_surveys(organisation_id).await?,
        };

        if !extract_phase.success() {
            error!(
                failed = extract_phase.summary.failed,
                "Extract phase failed, skipping transform phase"
            );
            return Ok(PipelineReport {
                overall_success: false,
                extract_phase,
                transform_phase: None,
            });
        }

        let transform_phase = match &survey_ids {
            Some(ids) => {
                self.transform_specific_surveys(ids, force_mappings_update)
                    .await?
            }
            None => {
                self.transform_all_surveys(organisation_id, force_mappings_update)
                    .await?
            }
        };

        let overall_success = transform_phase.success();
        info!(overall_success, "Full pipeline complete");

        Ok(PipelineReport {
            overall_success,
            extract_phase,
            transform_phase: Some(transform_phase),
        })
    }
}
