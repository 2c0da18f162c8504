//! Survey response entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "survey_responses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning survey (surrogate id)
    pub survey_id: Uuid,

    /// Submission timestamp; null when the source value was unparsable
    pub submitted_at: Option<DateTimeWithTimeZone>,

    pub period_year: Option<i32>,

    pub period_month: Option<i32>,

    /// Full original record as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub response_data: serde_json::Value,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::survey::Entity",
        from = "Column::SurveyId",
        to = "super::survey::Column::Id"
    )]
    Survey,
}

impl Related<super::survey::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Survey.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
