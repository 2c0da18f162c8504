//! Extraction log entity
//!
//! Append-only audit trail of downloaded export files, one row per
//! successful download. The two most recent hashes per survey drive
//! duplicate-download detection.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "survey_responses_extraction_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Platform-assigned survey identifier
    #[sea_orm(column_type = "Text")]
    pub survey_id: String,

    #[sea_orm(column_type = "Text")]
    pub file_name: String,

    pub file_size: i64,

    /// SHA-256 of the stored file, hex encoded
    #[sea_orm(column_type = "Text")]
    pub file_hash: String,

    pub extracted_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
