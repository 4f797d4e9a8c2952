//! Persistence layer: libSQL-backed storage for finished assessments.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    AssessmentFilter, AssessmentRecord, AssessmentStore, NewAssessmentRecord, RecordStatus,
};
