//! Typed outcome tree for ETL operations
//!
//! Per-survey operations report success, skip, and failure as explicit
//! variants rather than raised errors, so batch loops can aggregate
//! without exception-driven branching. Everything here serializes
//! straight into the HTTP response envelope.

use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate counts for one batch operation
///
/// `successful + failed == total` holds by construction.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl BatchSummary {
    /// Count one per-survey outcome
    pub fn record(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Outcome of one survey's response extraction
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SurveyExtractOutcome {
    Success {
        file_name: String,
        file_size: usize,
        file_hash: String,
        record_count: usize,
    },
    Failed {
        error: String,
    },
}

impl SurveyExtractOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, SurveyExtractOutcome::Success { .. })
    }
}

/// Batch response-extraction result keyed by survey id
#[derive(Debug, Clone, Serialize)]
pub struct ExtractBatchResult {
    pub summary: BatchSummary,
    pub surveys: BTreeMap<String, SurveyExtractOutcome>,
}

impl ExtractBatchResult {
    /// Whether the batch as a whole counts as successful
    pub fn success(&self) -> bool {
        self.summary.failed == 0
    }
}

/// Outcome of one survey's definitions extraction
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DefinitionsOutcome {
    Extracted {
        survey_name: String,
        question_count: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

impl DefinitionsOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, DefinitionsOutcome::Failed { .. })
    }
}

/// Batch definitions-extraction result
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionsBatchResult {
    pub summary: BatchSummary,
    pub extracted: usize,
    pub skipped: usize,
    pub surveys: BTreeMap<String, DefinitionsOutcome>,
}

/// Outcome of loading derived mappings for one survey
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MappingsResult {
    Created {
        mapping_count: usize,
        key_field_count: usize,
    },
    Updated {
        mapping_count: usize,
        key_field_count: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

impl MappingsResult {
    pub fn succeeded(&self) -> bool {
        !matches!(self, MappingsResult::Failed { .. })
    }
}

/// Row counts reported by the response load engine
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResponsesLoad {
    pub deleted: u64,
    pub inserted: u64,
    pub total_input: usize,
}

/// Outcome of transforming and loading one survey's responses
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResponsesResult {
    Loaded {
        deleted: u64,
        inserted: u64,
        total_source: usize,
        transformed: usize,
    },
    SkippedDuplicate {
        file_hash: String,
    },
    Failed {
        error: String,
    },
}

impl ResponsesResult {
    pub fn succeeded(&self) -> bool {
        !matches!(self, ResponsesResult::Failed { .. })
    }
}

/// Combined transform-and-load result for one survey
///
/// Mapping and response processing run independently; overall success
/// requires both.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyTransformResult {
    pub success: bool,
    pub mappings: MappingsResult,
    pub responses: ResponsesResult,
}

/// Batch transform-and-load result keyed by survey id
#[derive(Debug, Clone, Serialize)]
pub struct TransformBatchResult {
    pub summary: BatchSummary,
    pub surveys: BTreeMap<String, SurveyTransformResult>,
}

impl TransformBatchResult {
    pub fn success(&self) -> bool {
        self.summary.failed == 0
    }
}

/// Two-phase full pipeline report
///
/// The transform phase is absent when the extract phase failed and the
/// pipeline short-circuited.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub overall_success: bool,
    pub extract_phase: ExtractBatchResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform_phase: Option<TransformBatchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_balance() {
        let mut summary = BatchSummary::default();
        summary.record(true);
        summary.record(false);
        summary.record(true);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.successful + summary.failed, summary.total);
    }

    #[test]
    fn test_skip_variants_count_as_success() {
        assert!(MappingsResult::Skipped {
            reason: "mappings already exist".into()
        }
        .succeeded());
        assert!(ResponsesResult::SkippedDuplicate {
            file_hash: "abc".into()
        }
        .succeeded());
        assert!(!MappingsResult::Failed { error: "x".into() }.succeeded());
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let outcome = SurveyExtractOutcome::Success {
            file_name: "qualtrics_data_SV_1_20240101000000.csv".into(),
            file_size: 128,
            file_hash: "deadbeef".into(),
            record_count: 5,
        };

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["record_count"], 5);
    }
}
