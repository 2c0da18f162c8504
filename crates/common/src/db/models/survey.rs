//! Survey entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Survey lifecycle status enum
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyStatus {
    Active,
    Inactive,
}

impl From<String> for SurveyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => SurveyStatus::Active,
            _ => SurveyStatus::Inactive,
        }
    }
}

impl From<SurveyStatus> for String {
    fn from(status: SurveyStatus) -> Self {
        match status {
            SurveyStatus::Active => "active".to_string(),
            SurveyStatus::Inactive => "inactive".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "surveys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Platform-assigned survey identifier
    #[sea_orm(column_type = "Text")]
    pub qualtrics_survey_id: String,

    pub organisation_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub name: Option<String>,

    /// Derived code-to-label tables as JSONB
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub field_mapping: Option<serde_json::Value>,

    #[sea_orm(column_type = "Text", nullable)]
    pub service_type: Option<String>,
}

impl Model {
    /// Get the lifecycle status as an enum
    pub fn survey_status(&self) -> SurveyStatus {
        SurveyStatus::from(self.status.clone())
    }

    /// Whether a usable field mapping is already stored (non-null, non-empty)
    pub fn has_field_mapping(&self) -> bool {
        match &self.field_mapping {
            None => false,
            Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::survey_response::Entity")]
    Responses,
}

impl Related<super::survey_response::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Responses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn survey(field_mapping: Option<serde_json::Value>) -> Model {
        Model {
            id: Uuid::new_v4(),
            qualtrics_survey_id: "SV_abc123".to_string(),
            organisation_id: Uuid::new_v4(),
            status: "active".to_string(),
            name: None,
            field_mapping,
            service_type: None,
        }
    }

    #[test]
    fn test_has_field_mapping() {
        assert!(!survey(None).has_field_mapping());
        assert!(!survey(Some(json!(null))).has_field_mapping());
        assert!(!survey(Some(json!({}))).has_field_mapping());
        assert!(survey(Some(json!({"mappings": {}}))).has_field_mapping());
    }

    #[test]
    fn test_status_enum_round_trip() {
        assert_eq!(survey(None).survey_status(), SurveyStatus::Active);
        assert_eq!(String::from(SurveyStatus::Inactive), "inactive");
    }
}
