//! API handlers module

pub mod etl;
pub mod health;
pub mod status;

use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Uniform success envelope every endpoint returns
///
/// The failure side of the envelope is rendered by `AppError`'s
/// `IntoResponse` implementation.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            timestamp: Utc::now(),
            data,
        })
    }
}

/// Common request body for the ETL endpoints
///
/// All fields are optional; an absent body means "all active surveys,
/// no organisation filter, no forced mapping update".
#[derive(Debug, Default, Deserialize)]
pub struct EtlRequest {
    #[serde(default)]
    pub survey_ids: Option<Vec<String>>,

    #[serde(default)]
    pub organisation_id: Option<Uuid>,

    #[serde(default)]
    pub force_mappings_update: bool,
}

#[cfg(test)]
mod tests {
    use crate::{create_router, AppState};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use qualtrics_etl_common::config::AppConfig;
    use qualtrics_etl_common::db::DbPool;
    use qualtrics_etl_common::qualtrics::MockQualtricsApi;
    use qualtrics_etl_common::storage::ExtractStore;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state_with(db: DatabaseConnection, dir: &std::path::Path) -> AppState {
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.to_path_buf();

        AppState {
            store: ExtractStore::new(&config.storage),
            config: Arc::new(config),
            db: DbPool::from_connection(db),
            qualtrics: Arc::new(MockQualtricsApi::new()),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_healthy_when_database_answers() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([(
                "?column?",
                sea_orm::Value::from(1i32),
            )])]])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state_with(db, dir.path()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_empty_survey_id_list_returns_validation_envelope() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state_with(db, dir.path()));

        let response = app
            .oneshot(
                Request::post("/api/extract-data")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"survey_ids": []}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_status_degrades_sections_instead_of_failing() {
        // count finds three surveys; the id list and recent-log sections
        // come back empty
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                vec![BTreeMap::from([("total", sea_orm::Value::from(3i64))])],
                Vec::new(),
                Vec::new(),
            ])
            .into_connection();

        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state_with(db, dir.path()));

        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["survey_count"], 3);
        assert!(body["data"]["survey_ids"].as_array().unwrap().is_empty());
        assert_eq!(body["data"]["configuration"]["data_center"], "syd1");
    }
}
