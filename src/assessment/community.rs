//! Peer-group view: who else was routed into the same focus group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::FocusGroup;
use crate::error::DatabaseError;
use crate::store::{AssessmentFilter, AssessmentRecord, AssessmentStore};

/// Display information for a focus group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: FocusGroup,
    pub title: String,
    pub description: String,
    pub icon: String,
}

impl From<FocusGroup> for GroupInfo {
    fn from(group: FocusGroup) -> Self {
        Self {
            id: group,
            title: group.title().to_string(),
            description: group.description().to_string(),
            icon: group.icon().to_string(),
        }
    }
}

/// A completed participant as shown to their peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMember {
    pub record_id: Uuid,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl From<&AssessmentRecord> for PeerMember {
    fn from(record: &AssessmentRecord) -> Self {
        Self {
            record_id: record.id,
            age: record.record.age,
            gender: record.record.gender.clone(),
            joined_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityView {
    pub group: GroupInfo,
    pub members: Vec<PeerMember>,
}

/// Completed members of `group`, oldest first, leaving out `exclude`.
pub async fn group_members(
    store: &dyn AssessmentStore,
    group: FocusGroup,
    exclude: Option<Uuid>,
) -> Result<CommunityView, DatabaseError> {
    let records = store
        .filter_assessments(&AssessmentFilter::completed_in(group))
        .await?;
    let members = records
        .iter()
        .filter(|r| Some(r.id) != exclude)
        .map(PeerMember::from)
        .collect();
    Ok(CommunityView {
        group: group.into(),
        members,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::assessment::report::fixtures::report;
    use crate::assessment::state::Stage;
    use crate::store::{LibSqlBackend, NewAssessmentRecord, RecordStatus};

    fn record(group: FocusGroup, age: u32) -> NewAssessmentRecord {
        NewAssessmentRecord {
            session_id: Uuid::new_v4(),
            age: Some(age),
            gender: None,
            conversation_history: Vec::new(),
            probable_groups: vec![group],
            final_focus_group: group,
            psychometric_scores: BTreeMap::new(),
            assessment_stage: Stage::Completed,
            psych_report: String::new(),
            full_report: report(),
            status: RecordStatus::Completed,
        }
    }

    #[test]
    fn group_info_uses_display_names() {
        let info = GroupInfo::from(FocusGroup::AnxietyManagement);
        assert_eq!(info.title, "Anxiety & Calm");
        assert_eq!(
            serde_json::to_value(&info).unwrap()["id"],
            "anxiety-management"
        );
    }

    #[tokio::test]
    async fn members_exclude_self_and_other_groups() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let me = store
            .create_assessment(record(FocusGroup::WorkplaceStress, 30))
            .await
            .unwrap();
        let peer = store
            .create_assessment(record(FocusGroup::WorkplaceStress, 41))
            .await
            .unwrap();
        store
            .create_assessment(record(FocusGroup::PostpartumDepression, 28))
            .await
            .unwrap();

        let view = group_members(&store, FocusGroup::WorkplaceStress, Some(me.id))
            .await
            .unwrap();
        assert_eq!(view.group.title, "Work-Life Balance");
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.members[0].record_id, peer.id);
        assert_eq!(view.members[0].age, Some(41));

        let everyone = group_members(&store, FocusGroup::WorkplaceStress, None)
            .await
            .unwrap();
        assert_eq!(everyone.members.len(), 2);
    }
}
