//! SeaORM entity models
//!
//! Database entities for the Qualtrics ETL services

mod survey;
mod survey_response;
mod extraction_log;

pub use survey::{
    Entity as SurveyEntity,
    Model as Survey,
    ActiveModel as SurveyActiveModel,
    Column as SurveyColumn,
    SurveyStatus,
};

pub use survey_response::{
    Entity as SurveyResponseEntity,
    Model as SurveyResponse,
    ActiveModel as SurveyResponseActiveModel,
    Column as SurveyResponseColumn,
};

pub use extraction_log::{
    Entity as ExtractionLogEntity,
    Model as ExtractionLog,
    ActiveModel as ExtractionLogActiveModel,
    Column as ExtractionLogColumn,
};
