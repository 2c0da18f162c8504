//! Remote survey platform client
//!
//! Wraps the Qualtrics v3 REST API:
//! - the asynchronous response-export protocol (start, poll, download)
//! - the synchronous survey-definitions fetch
//!
//! No retries happen at this layer; retry/poll policy belongs to the
//! extraction orchestrator.

use crate::config::QualtricsConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Export job status reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    #[serde(rename = "inProgress")]
    InProgress,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "error")]
    Error,
    /// Unrecognized statuses keep the poll loop going until the ceiling
    #[serde(other)]
    Unknown,
}

impl ExportStatus {
    /// Terminal success state
    pub fn is_complete(&self) -> bool {
        matches!(self, ExportStatus::Complete)
    }

    /// Terminal failure state
    pub fn is_failure(&self) -> bool {
        matches!(self, ExportStatus::Failed | ExportStatus::Error)
    }
}

/// Snapshot of an export job's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub status: ExportStatus,

    #[serde(default)]
    pub percent_complete: f64,

    #[serde(default)]
    pub file_id: Option<String>,
}

impl ExportProgress {
    /// A job still running at the given percentage
    pub fn in_progress(percent_complete: f64) -> Self {
        Self {
            status: ExportStatus::InProgress,
            percent_complete,
            file_id: None,
        }
    }

    /// A finished job carrying its downloadable file id
    pub fn complete(file_id: &str) -> Self {
        Self {
            status: ExportStatus::Complete,
            percent_complete: 100.0,
            file_id: Some(file_id.to_string()),
        }
    }

    /// A job the platform reports as failed
    pub fn failed() -> Self {
        Self {
            status: ExportStatus::Failed,
            percent_complete: 0.0,
            file_id: None,
        }
    }
}

/// One question of a survey schema, as returned by the definitions endpoint
///
/// Choice values arrive either as objects carrying a `Display` label or as
/// bare scalars; both forms are kept as raw JSON and resolved during mapping
/// derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    #[serde(rename = "DataExportTag", default)]
    pub data_export_tag: Option<String>,

    #[serde(rename = "Choices", default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(rename = "RecodeValues", default, skip_serializing_if = "Option::is_none")]
    pub recode_values: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Survey schema metadata: display name plus questions keyed by question id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyDefinitions {
    #[serde(rename = "SurveyName")]
    pub survey_name: String,

    #[serde(rename = "Questions", default)]
    pub questions: BTreeMap<String, QuestionDefinition>,
}

/// Envelope every Qualtrics endpoint wraps its payload in
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct StartExportResult {
    #[serde(rename = "progressId")]
    progress_id: String,
}

/// Remote survey platform operations
#[async_trait]
pub trait QualtricsApi: Send + Sync {
    /// Issue an asynchronous export request, returning its progress id
    async fn start_export(&self, survey_id: &str) -> Result<String>;

    /// Poll the state of a running export
    async fn check_export_status(
        &self,
        survey_id: &str,
        progress_id: &str,
    ) -> Result<ExportProgress>;

    /// Fetch the completed export artifact (a zip archive)
    async fn download_export_file(&self, survey_id: &str, file_id: &str) -> Result<Vec<u8>>;

    /// Fetch schema metadata for a survey
    async fn get_survey_definitions(&self, survey_id: &str) -> Result<SurveyDefinitions>;
}

/// HTTP client against the Qualtrics v3 API
pub struct QualtricsClient {
    client: reqwest::Client,
    api_token: String,
    base_url: String,
}

impl QualtricsClient {
    /// Create a new client from configuration
    pub fn new(config: &QualtricsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_token: config.api_token.clone(),
            base_url: format!("https://{}.qualtrics.com/API/v3", config.data_center),
        }
    }

    async fn send(
        &self,
        survey_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = request
            .header("x-api-token", &self.api_token)
            .send()
            .await
            .map_err(|e| AppError::RemoteRequest {
                survey_id: survey_id.to_string(),
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::RemoteRequest {
                survey_id: survey_id.to_string(),
                message: format!("API error {}: {}", status, body),
            });
        }

        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        survey_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = self.send(survey_id, request).await?;

        let envelope: ApiEnvelope<T> =
            response.json().await.map_err(|e| AppError::RemoteRequest {
                survey_id: survey_id.to_string(),
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(envelope.result)
    }
}

#[async_trait]
impl QualtricsApi for QualtricsClient {
    async fn start_export(&self, survey_id: &str) -> Result<String> {
        let url = format!("{}/surveys/{}/export-responses/", self.base_url, survey_id);

        let request = self.client.post(&url).json(&serde_json::json!({
            "format": "csv",
        }));

        let result: StartExportResult = self.send_json(survey_id, request).await?;

        tracing::debug!(
            survey_id = %survey_id,
            progress_id = %result.progress_id,
            "Export started"
        );

        Ok(result.progress_id)
    }

    async fn check_export_status(
        &self,
        survey_id: &str,
        progress_id: &str,
    ) -> Result<ExportProgress> {
        let url = format!(
            "{}/surveys/{}/export-responses/{}",
            self.base_url, survey_id, progress_id
        );

        self.send_json(survey_id, self.client.get(&url)).await
    }

    async fn download_export_file(&self, survey_id: &str, file_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/surveys/{}/export-responses/{}/file",
            self.base_url, survey_id, file_id
        );

        let response = self.send(survey_id, self.client.get(&url)).await?;

        let bytes = response.bytes().await.map_err(|e| AppError::RemoteRequest {
            survey_id: survey_id.to_string(),
            message: format!("Failed to read export file: {}", e),
        })?;

        Ok(bytes.to_vec())
    }

    async fn get_survey_definitions(&self, survey_id: &str) -> Result<SurveyDefinitions> {
        let url = format!("{}/survey-definitions/{}", self.base_url, survey_id);

        self.send_json(survey_id, self.client.get(&url)).await
    }
}

/// Scripted mock client for orchestration tests
#[derive(Default)]
pub struct MockQualtricsApi {
    progress_sequence: Mutex<VecDeque<ExportProgress>>,
    file_bytes: Vec<u8>,
    definitions: Option<SurveyDefinitions>,
    fail_start: bool,
}

impl MockQualtricsApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay these progress snapshots, one per status check
    pub fn with_progress_sequence(self, sequence: Vec<ExportProgress>) -> Self {
        Self {
            progress_sequence: Mutex::new(sequence.into()),
            ..self
        }
    }

    /// Bytes returned from `download_export_file`
    pub fn with_file_bytes(self, bytes: Vec<u8>) -> Self {
        Self {
            file_bytes: bytes,
            ..self
        }
    }

    /// Definitions returned from `get_survey_definitions`
    pub fn with_definitions(self, definitions: SurveyDefinitions) -> Self {
        Self {
            definitions: Some(definitions),
            ..self
        }
    }

    /// Make `start_export` fail with a remote error
    pub fn with_failing_start(self) -> Self {
        Self {
            fail_start: true,
            ..self
        }
    }

    /// Progress snapshots not yet consumed by status checks
    pub fn remaining_progress(&self) -> usize {
        self.progress_sequence.lock().unwrap().len()
    }
}

#[async_trait]
impl QualtricsApi for MockQualtricsApi {
    async fn start_export(&self, survey_id: &str) -> Result<String> {
        if self.fail_start {
            return Err(AppError::RemoteRequest {
                survey_id: survey_id.to_string(),
                message: "API error 500: mock failure".to_string(),
            });
        }

        Ok("MOCK-PROGRESS".to_string())
    }

    async fn check_export_status(
        &self,
        _survey_id: &str,
        _progress_id: &str,
    ) -> Result<ExportProgress> {
        self.progress_sequence
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::Internal {
                message: "Mock progress sequence exhausted".to_string(),
            })
    }

    async fn download_export_file(&self, _survey_id: &str, _file_id: &str) -> Result<Vec<u8>> {
        Ok(self.file_bytes.clone())
    }

    async fn get_survey_definitions(&self, survey_id: &str) -> Result<SurveyDefinitions> {
        self.definitions
            .clone()
            .ok_or_else(|| AppError::RemoteRequest {
                survey_id: survey_id.to_string(),
                message: "API error 404: no mock definitions".to_string(),
            })
    }
}
