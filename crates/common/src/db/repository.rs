//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::Result;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    NotSet, QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A response row ready for insertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSurveyResponse {
    pub submitted_at: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub period_year: Option<i32>,
    pub period_month: Option<i32>,
    pub response_data: serde_json::Value,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Survey Operations
    // ========================================================================

    /// Find a survey by its platform-assigned identifier
    pub async fn find_survey_by_platform_id(
        &self,
        qualtrics_survey_id: &str,
    ) -> Result<Option<Survey>> {
        SurveyEntity::find()
            .filter(SurveyColumn::QualtricsSurveyId.eq(qualtrics_survey_id))
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// List distinct active survey platform ids, optionally organisation-scoped
    pub async fn list_active_survey_ids(
        &self,
        organisation_id: Option<Uuid>,
    ) -> Result<Vec<String>> {
        let organisation_filter = organisation_id
            .map(|_| "AND organisation_id = $1")
            .unwrap_or("");

        let sql = format!(
            r#"
            SELECT DISTINCT qualtrics_survey_id
            FROM surveys
            WHERE status = 'active'
            {}
            ORDER BY qualtrics_survey_id
            "#,
            organisation_filter
        );

        let mut values: Vec<sea_orm::Value> = Vec::new();
        if let Some(oid) = organisation_id {
            values.push(oid.into());
        }

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);

        let ids = self
            .conn()
            .query_all(stmt)
            .await?
            .into_iter()
            .filter_map(|row| row.try_get::<String>("", "qualtrics_survey_id").ok())
            .collect();

        Ok(ids)
    }

    /// List every distinct survey platform id regardless of status
    pub async fn list_survey_ids(&self) -> Result<Vec<String>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT DISTINCT qualtrics_survey_id FROM surveys ORDER BY qualtrics_survey_id",
        );

        let ids = self
            .conn()
            .query_all(stmt)
            .await?
            .into_iter()
            .filter_map(|row| row.try_get::<String>("", "qualtrics_survey_id").ok())
            .collect();

        Ok(ids)
    }

    /// Count distinct surveys
    pub async fn count_distinct_surveys(&self) -> Result<u64> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT COUNT(DISTINCT qualtrics_survey_id) AS total FROM surveys",
        );

        let total = match self.conn().query_one(stmt).await? {
            Some(row) => row.try_get::<i64>("", "total").unwrap_or(0),
            None => 0,
        };

        Ok(total.max(0) as u64)
    }

    /// Whether a survey already has a usable (non-null, non-empty) field mapping
    pub async fn has_field_mapping_by_platform_id(
        &self,
        qualtrics_survey_id: &str,
    ) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT id FROM surveys
            WHERE qualtrics_survey_id = $1
              AND field_mapping IS NOT NULL
              AND field_mapping != '{}'::jsonb
              AND field_mapping != 'null'::jsonb
            LIMIT 1
            "#,
            vec![qualtrics_survey_id.into()],
        );

        Ok(self.conn().query_one(stmt).await?.is_some())
    }

    /// Write the derived mapping tables, display name, and service type
    pub async fn update_survey_mappings(
        &self,
        survey: Survey,
        name: String,
        field_mapping: serde_json::Value,
        service_type: String,
    ) -> Result<Survey> {
        let mut survey: SurveyActiveModel = survey.into();

        survey.name = Set(Some(name));
        survey.field_mapping = Set(Some(field_mapping));
        survey.service_type = Set(Some(service_type));

        survey.update(self.conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Response Operations
    // ========================================================================

    /// Replace the stored responses for a survey inside one transaction
    ///
    /// Returns (deleted, inserted) row counts. A statement failure rolls the
    /// whole batch back.
    pub async fn replace_survey_responses(
        &self,
        survey_id: Uuid,
        rows: Vec<NewSurveyResponse>,
        replace_existing: bool,
    ) -> Result<(u64, u64)> {
        let txn = self.conn().begin().await?;

        let deleted = if replace_existing {
            SurveyResponseEntity::delete_many()
                .filter(SurveyResponseColumn::SurveyId.eq(survey_id))
                .exec(&txn)
                .await?
                .rows_affected
        } else {
            0
        };

        let mut inserted = 0u64;
        for row in rows {
            let response = SurveyResponseActiveModel {
                id: Set(Uuid::new_v4()),
                survey_id: Set(survey_id),
                submitted_at: Set(row.submitted_at),
                period_year: Set(row.period_year),
                period_month: Set(row.period_month),
                response_data: Set(row.response_data),
            };

            response.insert(&txn).await?;
            inserted += 1;
        }

        txn.commit().await?;

        Ok((deleted, inserted))
    }

    // ========================================================================
    // Extraction Log Operations
    // ========================================================================

    /// Append one extraction log entry
    pub async fn insert_extraction_log(
        &self,
        survey_id: &str,
        file_name: &str,
        file_size: i64,
        file_hash: &str,
    ) -> Result<ExtractionLog> {
        let entry = ExtractionLogActiveModel {
            id: NotSet,
            survey_id: Set(survey_id.to_string()),
            file_name: Set(file_name.to_string()),
            file_size: Set(file_size),
            file_hash: Set(file_hash.to_string()),
            extracted_at: Set(chrono::Utc::now().into()),
        };

        entry.insert(self.conn()).await.map_err(Into::into)
    }

    /// The most recent extraction hashes for a survey, newest first
    pub async fn latest_extraction_hashes(
        &self,
        survey_id: &str,
        limit: u64,
    ) -> Result<Vec<String>> {
        let entries = ExtractionLogEntity::find()
            .filter(ExtractionLogColumn::SurveyId.eq(survey_id))
            .order_by_desc(ExtractionLogColumn::ExtractedAt)
            .limit(limit)
            .all(self.conn())
            .await?;

        Ok(entries.into_iter().map(|e| e.file_hash).collect())
    }

    /// The most recent extraction log entries across all surveys
    pub async fn recent_extraction_logs(&self, limit: u64) -> Result<Vec<ExtractionLog>> {
        ExtractionLogEntity::find()
            .order_by_desc(ExtractionLogColumn::ExtractedAt)
            .limit(limit)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }
}
