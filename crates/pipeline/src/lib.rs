//! Qualtrics ETL Pipeline Core
//!
//! The extract-transform-load engine for survey data:
//! - Extraction orchestrator driving the remote export state machine
//! - Mapping derivation from survey schema definitions
//! - Response transformation (duplicate detection, column selection,
//!   period derivation)
//! - Load engine for mappings and response rows
//! - Pipeline coordinator composing the stages per survey

pub mod coordinator;
pub mod extract;
pub mod load;
pub mod mappings;
pub mod responses;
pub mod results;

pub use coordinator::PipelineCoordinator;
pub use extract::{DefinitionsExtract, ExtractionService, PollPolicy};
pub use load::LoadService;
pub use mappings::{derive_field_mappings, FieldMappings};
pub use responses::{ResponseTransformer, TransformOutcome};
