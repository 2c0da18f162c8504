//! Response transformation engine
//!
//! Turns the most recent extract file for a survey into load-ready
//! records: duplicate-download short-circuit, column selection, discard
//! of the export-format header rows, and period derivation from the
//! per-record end timestamp.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime};
use qualtrics_etl_common::db::{NewSurveyResponse, Repository};
use qualtrics_etl_common::errors::{AppError, Result};
use qualtrics_etl_common::{metrics, ExtractStore};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// Columns kept from the export, in addition to the dynamic prefix family
pub const RESPONSE_COLUMNS: &[&str] = &[
    "Facility",
    "Satisfaction",
    "EndDate",
    "NPS",
    "NPS_NPS_GROUP",
    "Gender",
    "ParticipantType",
];

/// Dynamically named columns with this prefix are always kept
pub const RESPONSE_COLUMN_PREFIX: &str = "Ab_";

/// The Qualtrics CSV export repeats schema information in its first two
/// data rows; they are metadata, not responses.
const HEADER_METADATA_ROWS: usize = 2;

/// Column carrying the submission end timestamp
const END_DATE_COLUMN: &str = "EndDate";

/// Fixed regional offset used for period derivation (UTC+8)
const PERIOD_OFFSET_HOURS: i32 = 8;

/// Result of transforming one survey's latest extract
#[derive(Debug)]
pub enum TransformOutcome {
    /// Records ready for load, plus source row counts
    Transformed {
        records: Vec<NewSurveyResponse>,
        transformed: usize,
        total_source: usize,
    },

    /// The latest download was byte-identical to the previous one
    SkippedDuplicate { file_hash: String },
}

/// Response transformation engine
pub struct ResponseTransformer {
    repository: Repository,
    store: ExtractStore,
}

impl ResponseTransformer {
    pub fn new(repository: Repository, store: ExtractStore) -> Self {
        Self { repository, store }
    }

    /// Transform the latest extract file for a survey into load-ready records
    #[instrument(skip(self))]
    pub async fn transform_survey_responses(&self, survey_id: &str) -> Result<TransformOutcome> {
        // Duplicate check against the two most recent extraction hashes.
        // The check is advisory: if the log cannot be read, transform anyway.
        let hashes = match self.repository.latest_extraction_hashes(survey_id, 2).await {
            Ok(hashes) => hashes,
            Err(e) => {
                warn!(
                    survey_id = %survey_id,
                    error = %e,
                    "Could not read extraction log for duplicate check, transforming anyway"
                );
                Vec::new()
            }
        };
        if hashes.len() == 2 && hashes[0] == hashes[1] {
            info!(
                survey_id = %survey_id,
                file_hash = %hashes[0],
                "Latest download matches the previous one, skipping transform"
            );
            metrics::record_duplicate_skip();
            return Ok(TransformOutcome::SkippedDuplicate {
                file_hash: hashes[0].clone(),
            });
        }

        let path = self.store.latest_extract_path(survey_id).await?;
        debug!(survey_id = %survey_id, path = %path.display(), "Transforming latest extract");

        let bytes = tokio::fs::read(&path).await?;
        let (records, total_source) = transform_records(&bytes)?;

        info!(
            survey_id = %survey_id,
            transformed = records.len(),
            total_source,
            "Extract transformed"
        );

        Ok(TransformOutcome::Transformed {
            transformed: records.len(),
            total_source,
            records,
        })
    }
}

/// Transform raw CSV extract bytes into load-ready records
///
/// Keeps only the allow-listed and prefixed columns actually present,
/// discards the two header/metadata rows, and derives the submission
/// timestamp and period from `EndDate`. Returns the records plus the
/// total source row count (header line excluded).
pub fn transform_records(csv_bytes: &[u8]) -> Result<(Vec<NewSurveyResponse>, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(csv_bytes);

    let headers = reader
        .headers()
        .map_err(|e| AppError::Internal {
            message: format!("Failed to read extract header: {}", e),
        })?
        .clone();

    let selected: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| {
            RESPONSE_COLUMNS.contains(name) || name.starts_with(RESPONSE_COLUMN_PREFIX)
        })
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal {
            message: format!("Failed to parse extract rows: {}", e),
        })?;

    let total_source = rows.len();
    let mut records = Vec::with_capacity(total_source.saturating_sub(HEADER_METADATA_ROWS));

    for row in rows.into_iter().skip(HEADER_METADATA_ROWS) {
        let mut payload = serde_json::Map::new();
        for (idx, name) in &selected {
            let value = row.get(*idx).unwrap_or("");
            payload.insert(name.clone(), Value::String(value.to_string()));
        }

        let end_date = payload
            .get(END_DATE_COLUMN)
            .and_then(Value::as_str)
            .unwrap_or("");
        let (submitted_at, period_year, period_month) = derive_period(end_date);

        records.push(NewSurveyResponse {
            submitted_at,
            period_year,
            period_month,
            response_data: Value::Object(payload),
        });
    }

    Ok((records, total_source))
}

/// Parse an end timestamp and derive its reporting period
///
/// The raw value may carry a locale fragment after a comma, which is
/// dropped. The period is the year/month of the instant shifted into the
/// fixed UTC+8 reference offset; a parse failure leaves everything null.
pub fn derive_period(
    raw: &str,
) -> (Option<DateTime<FixedOffset>>, Option<i32>, Option<i32>) {
    let cleaned = raw.split(',').next().unwrap_or("").trim();
    if cleaned.is_empty() {
        return (None, None, None);
    }

    let Some(submitted_at) = parse_timestamp(cleaned) else {
        warn!(value = %raw, "Unparsable end timestamp, leaving period null");
        return (None, None, None);
    };

    let offset = FixedOffset::east_opt(PERIOD_OFFSET_HOURS * 3600)
        .expect("fixed offset is in range");
    let local = submitted_at.with_timezone(&offset);

    (
        Some(submitted_at),
        Some(local.year()),
        Some(local.month() as i32),
    )
}

/// Accepts RFC 3339 plus the bare date-time forms the export emits;
/// naive values are read as UTC.
fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualtrics_etl_common::config::StorageConfig;
    use qualtrics_etl_common::db::{DbPool, ExtractionLog};
    use sea_orm::{DatabaseBackend, MockDatabase};

    const SAMPLE_CSV: &[u8] = b"\
StartDate,EndDate,Facility,Satisfaction,Ab_Clinic,Internal\n\
Start Date,End Date,Facility,Satisfaction,Clinic,Internal\n\
{\"ImportId\":\"startDate\"},{\"ImportId\":\"endDate\"},{\"ImportId\":\"F\"},{\"ImportId\":\"S\"},{\"ImportId\":\"C\"},{\"ImportId\":\"I\"}\n\
2024-01-10 02:00:00,2024-03-31T17:00:00Z,North,4,Yes,secret\n\
2024-01-11 02:00:00,\"2024-01-15 10:30:00, Montag\",South,5,No,secret\n\
2024-01-12 02:00:00,not a date,North,3,Yes,secret\n";

    fn log_entry(id: i64, hash: &str) -> ExtractionLog {
        ExtractionLog {
            id,
            survey_id: "SV_abc123".to_string(),
            file_name: format!("qualtrics_data_SV_abc123_2024010100000{}.csv", id),
            file_size: 100,
            file_hash: hash.to_string(),
            extracted_at: chrono::Utc::now().into(),
        }
    }

    #[test]
    fn test_discards_two_metadata_rows_and_internal_columns() {
        let (records, total) = transform_records(SAMPLE_CSV).unwrap();

        assert_eq!(total, 5);
        assert_eq!(records.len(), 3);

        let first = &records[0].response_data;
        assert_eq!(first["Facility"], "North");
        assert_eq!(first["Satisfaction"], "4");
        assert_eq!(first["Ab_Clinic"], "Yes");
        assert!(first.get("Internal").is_none());
        assert!(first.get("StartDate").is_none());
    }

    #[test]
    fn test_short_table_yields_no_records() {
        let (records, total) =
            transform_records(b"EndDate,Facility\n2024-01-01,North\n").unwrap();
        assert_eq!(total, 1);
        assert!(records.is_empty());

        let (records, total) = transform_records(b"EndDate,Facility\n").unwrap();
        assert_eq!(total, 0);
        assert!(records.is_empty());
    }

    #[test]
    fn test_period_crosses_month_boundary_via_offset() {
        // 2024-03-31T17:00:00Z is 2024-04-01 01:00 at UTC+8
        let (submitted_at, year, month) = derive_period("2024-03-31T17:00:00Z");
        assert!(submitted_at.is_some());
        assert_eq!(year, Some(2024));
        assert_eq!(month, Some(4));
    }

    #[test]
    fn test_period_drops_locale_suffix() {
        let (submitted_at, year, month) = derive_period("2024-01-15 10:30:00, Montag");
        assert!(submitted_at.is_some());
        assert_eq!(year, Some(2024));
        assert_eq!(month, Some(1));
    }

    #[test]
    fn test_unparsable_timestamp_leaves_period_null() {
        assert_eq!(derive_period("not a date"), (None, None, None));
        assert_eq!(derive_period(""), (None, None, None));
    }

    #[test]
    fn test_bare_date_reads_as_utc_midnight() {
        let (_, year, month) = derive_period("2024-06-30");
        // Midnight UTC is 08:00 at UTC+8, still the same day
        assert_eq!(year, Some(2024));
        assert_eq!(month, Some(6));
    }

    #[test]
    fn test_record_periods_from_sample() {
        let (records, _) = transform_records(SAMPLE_CSV).unwrap();

        assert_eq!(records[0].period_year, Some(2024));
        assert_eq!(records[0].period_month, Some(4));
        assert_eq!(records[1].period_month, Some(1));
        assert_eq!(records[2].period_year, None);
        assert!(records[2].submitted_at.is_none());
    }

    #[tokio::test]
    async fn test_equal_hashes_skip_as_duplicate() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![log_entry(2, "aaaa"), log_entry(1, "aaaa")]])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let transformer = ResponseTransformer::new(
            Repository::new(DbPool::from_connection(db)),
            ExtractStore::new(&StorageConfig {
                data_dir: dir.path().to_path_buf(),
                file_prefix: "qualtrics_data".to_string(),
            }),
        );

        let outcome = transformer
            .transform_survey_responses("SV_abc123")
            .await
            .unwrap();

        match outcome {
            TransformOutcome::SkippedDuplicate { file_hash } => assert_eq!(file_hash, "aaaa"),
            other => panic!("expected duplicate skip, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreadable_extraction_log_still_transforms() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([sea_orm::DbErr::Custom("connection reset".to_string())])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let store = ExtractStore::new(&StorageConfig {
            data_dir: dir.path().to_path_buf(),
            file_prefix: "qualtrics_data".to_string(),
        });
        store
            .store_extract("SV_abc123", SAMPLE_CSV, chrono::Utc::now())
            .await
            .unwrap();

        let transformer =
            ResponseTransformer::new(Repository::new(DbPool::from_connection(db)), store);

        let outcome = transformer
            .transform_survey_responses("SV_abc123")
            .await
            .unwrap();

        match outcome {
            TransformOutcome::Transformed { transformed, .. } => assert_eq!(transformed, 3),
            other => panic!("expected transform, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unequal_hashes_proceed_to_transform() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![log_entry(2, "bbbb"), log_entry(1, "aaaa")]])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let store = ExtractStore::new(&StorageConfig {
            data_dir: dir.path().to_path_buf(),
            file_prefix: "qualtrics_data".to_string(),
        });
        store
            .store_extract("SV_abc123", SAMPLE_CSV, chrono::Utc::now())
            .await
            .unwrap();

        let transformer =
            ResponseTransformer::new(Repository::new(DbPool::from_connection(db)), store);

        let outcome = transformer
            .transform_survey_responses("SV_abc123")
            .await
            .unwrap();

        match outcome {
            TransformOutcome::Transformed {
                transformed,
                total_source,
                records,
            } => {
                assert_eq!(total_source, 5);
                assert_eq!(transformed, 3);
                assert_eq!(records.len(), 3);
            }
            other => panic!("expected transform, got {:?}", other),
        }
    }
}
