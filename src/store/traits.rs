//! `AssessmentStore` trait: append-only storage for finished assessments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assessment::model::{FocusGroup, Message};
use crate::assessment::report::WellnessReport;
use crate::assessment::state::Stage;
use crate::error::DatabaseError;

/// Lifecycle status of a stored assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    InProgress,
    Completed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown record status '{other}'")),
        }
    }
}

/// Everything needed to create an assessment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAssessmentRecord {
    pub session_id: Uuid,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub conversation_history: Vec<Message>,
    pub probable_groups: Vec<FocusGroup>,
    pub final_focus_group: FocusGroup,
    pub psychometric_scores: BTreeMap<FocusGroup, u32>,
    pub assessment_stage: Stage,
    /// Short report text shown in peer views.
    pub psych_report: String,
    pub full_report: WellnessReport,
    pub status: RecordStatus,
}

/// A stored assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: NewAssessmentRecord,
}

/// Equality filter over stored assessments. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssessmentFilter {
    pub final_focus_group: Option<FocusGroup>,
    pub status: Option<RecordStatus>,
}

impl AssessmentFilter {
    /// Completed assessments routed to `group`.
    pub fn completed_in(group: FocusGroup) -> Self {
        Self {
            final_focus_group: Some(group),
            status: Some(RecordStatus::Completed),
        }
    }
}

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Insert a record, assigning its id and creation time.
    async fn create_assessment(
        &self,
        record: NewAssessmentRecord,
    ) -> Result<AssessmentRecord, DatabaseError>;

    async fn get_assessment(&self, id: Uuid) -> Result<Option<AssessmentRecord>, DatabaseError>;

    /// Records matching `filter`, oldest first.
    async fn filter_assessments(
        &self,
        filter: &AssessmentFilter,
    ) -> Result<Vec<AssessmentRecord>, DatabaseError>;
}
