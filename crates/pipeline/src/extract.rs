//! Extraction orchestrator
//!
//! Drives one survey's response export end-to-end: start the remote
//! export job, poll it to a terminal state, download and unpack the
//! artifact, persist it under a timestamped name, and append the
//! extraction log entry. Also drives per-survey definitions fetch with
//! the already-mapped skip rule, plus the batch variants over survey
//! id sets.

use crate::results::{
    BatchSummary, DefinitionsBatchResult, DefinitionsOutcome, ExtractBatchResult,
    SurveyExtractOutcome,
};
use qualtrics_etl_common::config::QualtricsConfig;
use qualtrics_etl_common::db::Repository;
use qualtrics_etl_common::errors::{AppError, Result};
use qualtrics_etl_common::qualtrics::{QualtricsApi, SurveyDefinitions};
use qualtrics_etl_common::{metrics, ExtractStore};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Export status polling policy
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Sleep between status checks
    pub interval: Duration,

    /// Ceiling on accumulated polling time before the job counts as
    /// timed out
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &QualtricsConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.export_poll_interval_ms),
            max_wait: Duration::from_secs(config.export_poll_max_secs),
        }
    }
}

/// A stored extract file with its audit attributes
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub file_name: String,
    pub file_size: usize,
    pub file_hash: String,
    pub record_count: usize,
}

/// Result of a per-survey definitions extraction
#[derive(Debug)]
pub enum DefinitionsExtract {
    /// Definitions were fetched; the raw payload feeds mapping derivation
    Extracted(SurveyDefinitions),

    /// The survey already has a usable field mapping
    Skipped,
}

/// Extraction orchestrator
pub struct ExtractionService {
    repository: Repository,
    client: Arc<dyn QualtricsApi>,
    store: ExtractStore,
    poll: PollPolicy,
}

impl ExtractionService {
    pub fn new(
        repository: Repository,
        client: Arc<dyn QualtricsApi>,
        store: ExtractStore,
        poll: PollPolicy,
    ) -> Self {
        Self {
            repository,
            client,
            store,
            poll,
        }
    }

    // ========================================================================
    // Response Export
    // ========================================================================

    /// Export one survey's responses and persist the extract file
    #[instrument(skip(self))]
    pub async fn extract_survey_responses(&self, survey_id: &str) -> Result<ExtractedFile> {
        let started = Instant::now();

        let result = self.run_export(survey_id).await;
        metrics::record_export(started.elapsed().as_secs_f64(), result.is_ok());

        result
    }

    async fn run_export(&self, survey_id: &str) -> Result<ExtractedFile> {
        info!(survey_id = %survey_id, "Starting response export");

        let progress_id = self.client.start_export(survey_id).await?;
        let file_id = self.wait_for_export(survey_id, &progress_id).await?;

        let archive = self.client.download_export_file(survey_id, &file_id).await?;
        let csv_bytes = unpack_single_csv(survey_id, &archive)?;
        let record_count = count_csv_records(&csv_bytes);

        let stored = self
            .store
            .store_extract(survey_id, &csv_bytes, chrono::Utc::now())
            .await?;

        info!(
            survey_id = %survey_id,
            file_name = %stored.file_name,
            byte_size = stored.byte_size,
            record_count,
            "Extract file stored"
        );

        self.log_extraction(survey_id, &stored).await;

        Ok(ExtractedFile {
            file_name: stored.file_name,
            file_size: stored.byte_size,
            file_hash: stored.content_hash,
            record_count,
        })
    }

    /// Poll the export job until it reaches a terminal state
    ///
    /// Elapsed time accumulates in interval increments; crossing the
    /// configured ceiling fails the job as timed out. Unknown statuses
    /// keep the loop going.
    async fn wait_for_export(&self, survey_id: &str, progress_id: &str) -> Result<String> {
        let mut waited = Duration::ZERO;

        loop {
            let progress = self
                .client
                .check_export_status(survey_id, progress_id)
                .await?;

            if progress.status.is_complete() {
                return progress.file_id.ok_or_else(|| AppError::RemoteRequest {
                    survey_id: survey_id.to_string(),
                    message: "Export completed without a file id".to_string(),
                });
            }

            if progress.status.is_failure() {
                return Err(AppError::RemoteRequest {
                    survey_id: survey_id.to_string(),
                    message: format!("Export failed with status {:?}", progress.status),
                });
            }

            debug!(
                survey_id = %survey_id,
                percent_complete = progress.percent_complete,
                "Export in progress"
            );

            tokio::time::sleep(self.poll.interval).await;
            waited += self.poll.interval;

            if waited > self.poll.max_wait {
                return Err(AppError::ExportTimeout {
                    survey_id: survey_id.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }
        }
    }

    /// Append the extraction log entry; never fatal for the extraction
    async fn log_extraction(
        &self,
        survey_id: &str,
        stored: &qualtrics_etl_common::storage::StoredExtract,
    ) {
        match tokio::fs::try_exists(&stored.path).await {
            Ok(true) => {}
            _ => {
                warn!(
                    survey_id = %survey_id,
                    path = %stored.path.display(),
                    "Stored extract file missing, skipping extraction log"
                );
                return;
            }
        }

        if let Err(e) = self
            .repository
            .insert_extraction_log(
                survey_id,
                &stored.file_name,
                stored.byte_size as i64,
                &stored.content_hash,
            )
            .await
        {
            warn!(
                survey_id = %survey_id,
                error = %e,
                "Failed to write extraction log entry"
            );
        }
    }

    // ========================================================================
    // Definitions Extraction
    // ========================================================================

    /// Fetch schema definitions unless the survey is already mapped
    #[instrument(skip(self))]
    pub async fn extract_survey_definitions(
        &self,
        survey_id: &str,
        force: bool,
    ) -> Result<DefinitionsExtract> {
        if !force
            && self
                .repository
                .has_field_mapping_by_platform_id(survey_id)
                .await?
        {
            info!(survey_id = %survey_id, "Survey already mapped, skipping definitions fetch");
            metrics::record_definitions(true);
            return Ok(DefinitionsExtract::Skipped);
        }

        let definitions = self.client.get_survey_definitions(survey_id).await?;

        info!(
            survey_id = %survey_id,
            survey_name = %definitions.survey_name,
            question_count = definitions.questions.len(),
            "Definitions extracted"
        );
        metrics::record_definitions(false);

        Ok(DefinitionsExtract::Extracted(definitions))
    }

    // ========================================================================
    // Batch Operations
    // ========================================================================

    /// Export responses for every active survey, optionally organisation-scoped
    pub async fn extract_all_surveys(
        &self,
        organisation_id: Option<Uuid>,
    ) -> Result<ExtractBatchResult> {
        let ids = self.resolve_survey_ids(organisation_id).await?;
        Ok(self.extract_surveys(&ids).await)
    }

    /// Export responses for an explicit set of survey ids
    pub async fn extract_specific_surveys(&self, ids: &[String]) -> Result<ExtractBatchResult> {
        if ids.is_empty() {
            return Err(AppError::Validation {
                message: "survey_ids must not be empty".to_string(),
                field: Some("survey_ids".to_string()),
            });
        }

        Ok(self.extract_surveys(ids).await)
    }

    /// Extract definitions for every active survey
    pub async fn extract_all_surveys_definitions(
        &self,
        organisation_id: Option<Uuid>,
    ) -> Result<DefinitionsBatchResult> {
        let ids = self.resolve_survey_ids(organisation_id).await?;
        Ok(self.extract_definitions_batch(&ids).await)
    }

    /// Extract definitions for an explicit set of survey ids
    pub async fn extract_specific_surveys_definitions(
        &self,
        ids: &[String],
    ) -> Result<DefinitionsBatchResult> {
        if ids.is_empty() {
            return Err(AppError::Validation {
                message: "survey_ids must not be empty".to_string(),
                field: Some("survey_ids".to_string()),
            });
        }

        Ok(self.extract_definitions_batch(ids).await)
    }

    async fn resolve_survey_ids(&self, organisation_id: Option<Uuid>) -> Result<Vec<String>> {
        let ids = self
            .repository
            .list_active_survey_ids(organisation_id)
            .await?;

        if ids.is_empty() {
            return Err(AppError::NoSurveysFound);
        }

        Ok(ids)
    }

    /// Sequential per-survey export; one survey's failure never blocks others
    async fn extract_surveys(&self, ids: &[String]) -> ExtractBatchResult {
        let mut summary = BatchSummary::default();
        let mut surveys = BTreeMap::new();

        for survey_id in ids {
            let outcome = match self.extract_survey_responses(survey_id).await {
                Ok(extracted) => SurveyExtractOutcome::Success {
                    file_name: extracted.file_name,
                    file_size: extracted.file_size,
                    file_hash: extracted.file_hash,
                    record_count: extracted.record_count,
                },
                Err(e) => {
                    error!(survey_id = %survey_id, error = %e, "Survey extraction failed");
                    SurveyExtractOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            summary.record(outcome.succeeded());
            surveys.insert(survey_id.clone(), outcome);
        }

        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "Batch extraction complete"
        );

        ExtractBatchResult { summary, surveys }
    }

    async fn extract_definitions_batch(&self, ids: &[String]) -> DefinitionsBatchResult {
        let mut summary = BatchSummary::default();
        let mut extracted = 0;
        let mut skipped = 0;
        let mut surveys = BTreeMap::new();

        for survey_id in ids {
            let outcome = match self.extract_survey_definitions(survey_id, false).await {
                Ok(DefinitionsExtract::Extracted(definitions)) => {
                    extracted += 1;
                    DefinitionsOutcome::Extracted {
                        survey_name: definitions.survey_name,
                        question_count: definitions.questions.len(),
                    }
                }
                Ok(DefinitionsExtract::Skipped) => {
                    skipped += 1;
                    DefinitionsOutcome::Skipped {
                        reason: "mappings already exist".to_string(),
                    }
                }
                Err(e) => {
                    error!(survey_id = %survey_id, error = %e, "Definitions extraction failed");
                    DefinitionsOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            summary.record(outcome.succeeded());
            surveys.insert(survey_id.clone(), outcome);
        }

        DefinitionsBatchResult {
            summary,
            extracted,
            skipped,
            surveys,
        }
    }
}

/// Open the downloaded archive and decode its single contained CSV
fn unpack_single_csv(survey_id: &str, archive_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(archive_bytes)).map_err(|e| AppError::RemoteRequest {
            survey_id: survey_id.to_string(),
            message: format!("Malformed export archive: {}", e),
        })?;

    if archive.is_empty() {
        return Err(AppError::RemoteRequest {
            survey_id: survey_id.to_string(),
            message: "Export archive contains no files".to_string(),
        });
    }

    let mut entry = archive.by_index(0).map_err(|e| AppError::RemoteRequest {
        survey_id: survey_id.to_string(),
        message: format!("Failed to read export archive entry: {}", e),
    })?;

    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| AppError::RemoteRequest {
            survey_id: survey_id.to_string(),
            message: format!("Failed to decode export file: {}", e),
        })?;

    Ok(bytes)
}

/// Number of data rows in the extract, header line excluded
fn count_csv_records(csv_bytes: &[u8]) -> usize {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(csv_bytes)
        .records()
        .filter(|r| r.is_ok())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualtrics_etl_common::config::StorageConfig;
    use qualtrics_etl_common::db::{DbPool, ExtractionLog};
    use qualtrics_etl_common::qualtrics::{ExportProgress, MockQualtricsApi};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::collections::BTreeMap as Map;
    use std::io::Write;

    const CSV_BYTES: &[u8] =
        b"EndDate,Facility\nEnd Date,Facility\nmeta,meta\n2024-01-01,North\n2024-01-02,South\n";

    fn zip_archive(csv: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("export.csv", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(csv).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn store_at(dir: &std::path::Path) -> ExtractStore {
        ExtractStore::new(&StorageConfig {
            data_dir: dir.to_path_buf(),
            file_prefix: "qualtrics_data".to_string(),
        })
    }

    fn fast_poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Duration::from_secs(5),
        }
    }

    fn log_row() -> ExtractionLog {
        ExtractionLog {
            id: 1,
            survey_id: "SV_abc123".to_string(),
            file_name: "qualtrics_data_SV_abc123_20240101000000.csv".to_string(),
            file_size: CSV_BYTES.len() as i64,
            file_hash: ExtractStore::sha256_hex(CSV_BYTES),
            extracted_at: chrono::Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_export_completes_after_polling_and_logs_hash() {
        let client = MockQualtricsApi::new()
            .with_progress_sequence(vec![
                ExportProgress::in_progress(10.0),
                ExportProgress::in_progress(75.0),
                ExportProgress::complete("file-1"),
            ])
            .with_file_bytes(zip_archive(CSV_BYTES));

        // One insert for the single extraction log entry
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 1,
                rows_affected: 1,
            }])
            .append_query_results([vec![log_row()]])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(client),
            store_at(dir.path()),
            fast_poll(),
        );

        let extracted = service.extract_survey_responses("SV_abc123").await.unwrap();

        assert_eq!(extracted.file_hash, ExtractStore::sha256_hex(CSV_BYTES));
        assert_eq!(extracted.file_size, CSV_BYTES.len());
        assert_eq!(extracted.record_count, 4);

        let stored = std::fs::read(dir.path().join(&extracted.file_name)).unwrap();
        assert_eq!(stored, CSV_BYTES);
    }

    #[tokio::test]
    async fn test_export_times_out_at_ceiling() {
        let client = MockQualtricsApi::new().with_progress_sequence(vec![
            ExportProgress::in_progress(5.0),
            ExportProgress::in_progress(6.0),
        ]);

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(client),
            store_at(dir.path()),
            PollPolicy {
                interval: Duration::from_millis(1),
                max_wait: Duration::ZERO,
            },
        );

        let err = service
            .extract_survey_responses("SV_abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExportTimeout { .. }));
    }

    #[tokio::test]
    async fn test_failed_export_status_propagates() {
        let client =
            MockQualtricsApi::new().with_progress_sequence(vec![ExportProgress::failed()]);

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(client),
            store_at(dir.path()),
            fast_poll(),
        );

        let err = service
            .extract_survey_responses("SV_abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteRequest { .. }));
    }

    #[tokio::test]
    async fn test_already_mapped_survey_skips_definitions() {
        // The mapping-existence probe finds a row
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![Map::from([(
                "id",
                sea_orm::Value::from(Uuid::new_v4()),
            )])]])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(MockQualtricsApi::new()),
            store_at(dir.path()),
            fast_poll(),
        );

        let outcome = service
            .extract_survey_definitions("SV_abc123", false)
            .await
            .unwrap();
        assert!(matches!(outcome, DefinitionsExtract::Skipped));
    }

    #[tokio::test]
    async fn test_force_bypasses_already_mapped_check() {
        let definitions: qualtrics_etl_common::qualtrics::SurveyDefinitions =
            serde_json::from_value(serde_json::json!({
                "SurveyName": "Patient Experience",
                "Questions": {},
            }))
            .unwrap();

        // No query results appended: a mapping-existence probe would fail
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(MockQualtricsApi::new().with_definitions(definitions)),
            store_at(dir.path()),
            fast_poll(),
        );

        let outcome = service
            .extract_survey_definitions("SV_abc123", true)
            .await
            .unwrap();

        match outcome {
            DefinitionsExtract::Extracted(defs) => {
                assert_eq!(defs.survey_name, "Patient Experience");
            }
            other => panic!("expected extracted definitions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_survey_id_list_is_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(MockQualtricsApi::new()),
            store_at(dir.path()),
            fast_poll(),
        );

        let err = service.extract_specific_surveys(&[]).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_no_resolved_surveys_fails_fast() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<Map<&str, sea_orm::Value>>::new()])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(MockQualtricsApi::new()),
            store_at(dir.path()),
            fast_poll(),
        );

        let err = service.extract_all_surveys(None).await.unwrap_err();
        assert!(matches!(err, AppError::NoSurveysFound));
    }

    #[tokio::test]
    async fn test_batch_counts_balance_with_failures() {
        let client = MockQualtricsApi::new().with_failing_start();

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let dir = tempfile::tempdir().unwrap();
        let service = ExtractionService::new(
            Repository::new(DbPool::from_connection(db)),
            Arc::new(client),
            store_at(dir.path()),
            fast_poll(),
        );

        let ids = vec!["SV_a".to_string(), "SV_b".to_string()];
        let result = service.extract_specific_surveys(&ids).await.unwrap();

        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.failed, 2);
        assert_eq!(
            result.summary.successful + result.summary.failed,
            result.summary.total
        );
        assert!(!result.success());
        assert!(!result.surveys["SV_a"].succeeded());
    }
}
