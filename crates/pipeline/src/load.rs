//! Load engine
//!
//! Idempotently upserts derived mapping tables and replaces-or-inserts
//! response rows per survey. Existence checks are live reads against the
//! store, never cached.

use crate::mappings::FieldMappings;
use crate::results::{MappingsResult, ResponsesLoad};
use qualtrics_etl_common::db::{NewSurveyResponse, Repository};
use qualtrics_etl_common::errors::{AppError, Result};
use qualtrics_etl_common::metrics;
use serde_json::Value;
use tracing::{info, instrument, warn};

/// Load engine
pub struct LoadService {
    repository: Repository,
}

impl LoadService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Upsert the derived mapping tables for a survey
    ///
    /// Skips when a usable mapping already exists and `force` is unset.
    #[instrument(skip(self, mappings))]
    pub async fn load_survey_mappings(
        &self,
        survey_id: &str,
        survey_name: &str,
        mappings: &FieldMappings,
        force: bool,
    ) -> Result<MappingsResult> {
        let survey = self
            .repository
            .find_survey_by_platform_id(survey_id)
            .await?
            .ok_or_else(|| AppError::SurveyNotFound {
                id: survey_id.to_string(),
            })?;

        if survey.has_field_mapping() && !force {
            info!(survey_id = %survey_id, "Mappings already exist, skipping load");
            metrics::record_mappings_load("skipped");
            return Ok(MappingsResult::Skipped {
                reason: "mappings already exist".to_string(),
            });
        }

        let updating = survey.has_field_mapping();
        let mapping_count = mappings.mappings.len();
        let key_field_count = mappings.key_fields.len();

        self.repository
            .update_survey_mappings(
                survey,
                survey_name.to_string(),
                mappings.to_json()?,
                mappings.service_type().to_string(),
            )
            .await?;

        let action = if updating { "updated" } else { "created" };
        info!(
            survey_id = %survey_id,
            action,
            mapping_count,
            key_field_count,
            "Mappings loaded"
        );
        metrics::record_mappings_load(action);

        if updating {
            Ok(MappingsResult::Updated {
                mapping_count,
                key_field_count,
            })
        } else {
            Ok(MappingsResult::Created {
                mapping_count,
                key_field_count,
            })
        }
    }

    /// Replace (or append to) a survey's stored responses in one transaction
    ///
    /// Rows whose payload is not a JSON object are logged and dropped
    /// before the insert; a statement failure rolls the whole batch back.
    #[instrument(skip(self, records))]
    pub async fn load_survey_responses(
        &self,
        survey_id: &str,
        records: Vec<NewSurveyResponse>,
        replace_existing: bool,
    ) -> Result<ResponsesLoad> {
        let survey = self
            .repository
            .find_survey_by_platform_id(survey_id)
            .await?
            .ok_or_else(|| AppError::SurveyNotFound {
                id: survey_id.to_string(),
            })?;

        let total_input = records.len();
        let rows: Vec<NewSurveyResponse> = records
            .into_iter()
            .filter(|row| match &row.response_data {
                Value::Object(_) => true,
                other => {
                    warn!(
                        survey_id = %survey_id,
                        payload = %other,
                        "Dropping response row with non-object payload"
                    );
                    false
                }
            })
            .collect();

        let (deleted, inserted) = self
            .repository
            .replace_survey_responses(survey.id, rows, replace_existing)
            .await?;

        info!(
            survey_id = %survey_id,
            deleted,
            inserted,
            total_input,
            "Responses loaded"
        );
        metrics::record_responses_loaded(inserted);

        Ok(ResponsesLoad {
            deleted,
            inserted,
            total_input,
        })
    }
}
