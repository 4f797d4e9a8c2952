//! Assessment data model: focus groups, answers, transcript, and the
//! per-conversation `AssessmentSession` aggregate.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::questions::QUESTIONS_PER_GROUP;
use super::report::WellnessReport;
use super::state::Stage;

/// Peer-support groups a participant can be routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusGroup {
    PostpartumDepression,
    AnxietyManagement,
    WorkplaceStress,
}

impl FocusGroup {
    pub const ALL: [FocusGroup; 3] = [
        FocusGroup::PostpartumDepression,
        FocusGroup::AnxietyManagement,
        FocusGroup::WorkplaceStress,
    ];

    /// Wire identifier, e.g. `"anxiety-management"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostpartumDepression => "postpartum-depression",
            Self::AnxietyManagement => "anxiety-management",
            Self::WorkplaceStress => "workplace-stress",
        }
    }

    /// Display name of the peer group.
    pub fn title(&self) -> &'static str {
        match self {
            Self::PostpartumDepression => "Postpartum Support",
            Self::AnxietyManagement => "Anxiety & Calm",
            Self::WorkplaceStress => "Work-Life Balance",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::PostpartumDepression => {
                "A nurturing space for new parents navigating the emotional journey of parenthood."
            }
            Self::AnxietyManagement => {
                "Learn techniques to manage anxiety and find your inner peace."
            }
            Self::WorkplaceStress => {
                "Navigate workplace challenges and build resilience together."
            }
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::PostpartumDepression => "🌸",
            Self::AnxietyManagement => "🦋",
            Self::WorkplaceStress => "⚖️",
        }
    }
}

impl std::fmt::Display for FocusGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FocusGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == s.trim())
            .ok_or_else(|| format!("unknown focus group '{s}'"))
    }
}

/// Likert-style answer to a psychometric question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikertAnswer {
    Rarely,
    Sometimes,
    Often,
    VeryOften,
}

impl LikertAnswer {
    pub const ALL: [LikertAnswer; 4] = [
        LikertAnswer::Rarely,
        LikertAnswer::Sometimes,
        LikertAnswer::Often,
        LikertAnswer::VeryOften,
    ];

    /// Ordinal score, 1–4.
    pub fn score(&self) -> u32 {
        match self {
            Self::Rarely => 1,
            Self::Sometimes => 2,
            Self::Often => 3,
            Self::VeryOften => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rarely => "Rarely",
            Self::Sometimes => "Sometimes",
            Self::Often => "Often",
            Self::VeryOften => "Very Often",
        }
    }
}

impl FromStr for LikertAnswer {
    type Err = String;

    /// Accepts the quick-option value (`"1"`–`"4"`) or the label, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u32>() {
            return Self::ALL
                .into_iter()
                .find(|a| a.score() == n)
                .ok_or_else(|| format!("score {n} is outside 1-4"));
        }
        Self::ALL
            .into_iter()
            .find(|a| a.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("'{trimmed}' is not one of Rarely, Sometimes, Often, Very Often"))
    }
}

/// Demographics collected during BasicInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub age: Option<u32>,
    pub gender: Option<String>,
}

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Bot,
    User,
    ImagePrompt,
}

/// A projective image shown to the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub index: usize,
    pub url: String,
    pub alt: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Image(ImageRef),
}

/// One transcript entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    pub sequence: u64,
}

impl Message {
    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Image(_) => None,
        }
    }
}

/// A discrete choice the participant may pick instead of typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickOption {
    pub label: String,
    pub value: String,
}

impl QuickOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// External operations the session can be waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    GroupInference,
    ReportSynthesis,
    Persistence,
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GroupInference => "group inference",
            Self::ReportSynthesis => "report synthesis",
            Self::Persistence => "persistence",
        };
        write!(f, "{s}")
    }
}

/// The complete mutable record of one assessment run.
///
/// Only the stage policy produces new versions of this value; the
/// orchestrator swaps them in whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSession {
    pub id: Uuid,
    pub stage: Stage,
    pub transcript: Vec<Message>,
    pub basic_info: BasicInfo,
    pub open_ended_responses: Vec<String>,
    pub probable_groups: Vec<FocusGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_reasoning: Option<String>,
    pub psychometric_scores: BTreeMap<FocusGroup, u32>,
    pub current_psych_question_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_group: Option<FocusGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_data: Option<WellnessReport>,
    /// External operation the conversation is suspended on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting: Option<AnalysisKind>,
    /// Synthesized report held until the record is durably stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_report: Option<WellnessReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

impl Default for AssessmentSession {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl AssessmentSession {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            stage: Stage::BasicInfo,
            transcript: Vec::new(),
            basic_info: BasicInfo::default(),
            open_ended_responses: Vec::new(),
            probable_groups: Vec::new(),
            inference_reasoning: None,
            psychometric_scores: BTreeMap::new(),
            current_psych_question_index: 0,
            final_group: None,
            report_data: None,
            awaiting: None,
            pending_report: None,
            record_id: None,
        }
    }

    /// Advance to the next stage. Returns an error if already terminal.
    pub fn advance(&mut self) -> Result<Stage, String> {
        let next = self
            .stage
            .next()
            .ok_or_else(|| "Already at terminal stage".to_string())?;
        if !self.stage.can_transition_to(next) {
            return Err(format!("Cannot transition from {} to {}", self.stage, next));
        }
        self.stage = next;
        Ok(next)
    }

    /// Append a message, assigning the next sequence number.
    pub fn push_message(&mut self, role: Role, content: MessageContent) -> Message {
        let message = Message {
            role,
            content,
            sequence: self.transcript.len() as u64,
        };
        self.transcript.push(message.clone());
        message
    }

    /// Number of psychometric questions this session will ask.
    pub fn total_psych_questions(&self) -> usize {
        self.probable_groups.len() * QUESTIONS_PER_GROUP
    }

    pub fn psychometric_done(&self) -> bool {
        !self.probable_groups.is_empty()
            && self.current_psych_question_index >= self.total_psych_questions()
    }

    /// User-authored text messages in transcript order.
    pub fn user_messages(&self) -> Vec<String> {
        self.transcript
            .iter()
            .filter(|m| m.role == Role::User)
            .filter_map(|m| m.text().map(str::to_string))
            .collect()
    }

    /// Highest-scoring probable group; ties go to the earlier-listed group.
    pub fn leading_group(&self) -> Option<FocusGroup> {
        let mut best: Option<(FocusGroup, u32)> = None;
        for group in &self.probable_groups {
            let score = self.psychometric_scores.get(group).copied().unwrap_or(0);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((*group, score)),
            }
        }
        best.map(|(group, _)| group)
    }

    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal() && self.report_data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_group_round_trips_through_str() {
        for group in FocusGroup::ALL {
            assert_eq!(group.as_str().parse::<FocusGroup>().unwrap(), group);
            let json = serde_json::to_string(&group).unwrap();
            assert_eq!(json, format!("\"{}\"", group.as_str()));
        }
        assert!("grief-support".parse::<FocusGroup>().is_err());
    }

    #[test]
    fn likert_parses_values_and_labels() {
        assert_eq!("1".parse::<LikertAnswer>().unwrap(), LikertAnswer::Rarely);
        assert_eq!(" 4 ".parse::<LikertAnswer>().unwrap(), LikertAnswer::VeryOften);
        assert_eq!("often".parse::<LikertAnswer>().unwrap(), LikertAnswer::Often);
        assert_eq!("Very Often".parse::<LikertAnswer>().unwrap(), LikertAnswer::VeryOften);
        assert!("5".parse::<LikertAnswer>().is_err());
        assert!("0".parse::<LikertAnswer>().is_err());
        assert!("always".parse::<LikertAnswer>().is_err());
    }

    #[test]
    fn likert_scores_are_one_to_four() {
        let scores: Vec<u32> = LikertAnswer::ALL.iter().map(|a| a.score()).collect();
        assert_eq!(scores, vec![1, 2, 3, 4]);
    }

    #[test]
    fn push_message_assigns_sequence() {
        let mut session = AssessmentSession::default();
        let a = session.push_message(Role::Bot, MessageContent::Text("hi".into()));
        let b = session.push_message(Role::User, MessageContent::Text("hello".into()));
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(session.user_messages(), vec!["hello".to_string()]);
    }

    #[test]
    fn leading_group_breaks_ties_by_order() {
        let mut session = AssessmentSession::default();
        session.probable_groups = vec![FocusGroup::AnxietyManagement, FocusGroup::WorkplaceStress];
        session.psychometric_scores.insert(FocusGroup::AnxietyManagement, 9);
        session.psychometric_scores.insert(FocusGroup::WorkplaceStress, 9);
        assert_eq!(session.leading_group(), Some(FocusGroup::AnxietyManagement));

        session.psychometric_scores.insert(FocusGroup::WorkplaceStress, 10);
        assert_eq!(session.leading_group(), Some(FocusGroup::WorkplaceStress));
    }

    #[test]
    fn leading_group_without_scores_is_first_listed() {
        let mut session = AssessmentSession::default();
        assert_eq!(session.leading_group(), None);
        session.probable_groups = vec![FocusGroup::WorkplaceStress, FocusGroup::PostpartumDepression];
        assert_eq!(session.leading_group(), Some(FocusGroup::WorkplaceStress));
    }

    #[test]
    fn advance_stops_at_terminal() {
        let mut session = AssessmentSession::default();
        for _ in 0..4 {
            session.advance().unwrap();
        }
        assert_eq!(session.stage, Stage::Completed);
        assert!(session.advance().is_err());
    }

    #[test]
    fn message_content_untagged_serde() {
        let text = Message {
            role: Role::Bot,
            content: MessageContent::Text("hello".into()),
            sequence: 0,
        };
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["content"], "hello");
        assert_eq!(json["role"], "bot");

        let parsed: Message = serde_json::from_value(serde_json::json!({
            "role": "image-prompt",
            "content": {"index": 0, "url": "u", "alt": "a", "prompt": "p"},
            "sequence": 3
        }))
        .unwrap();
        assert!(matches!(parsed.content, MessageContent::Image(ref img) if img.index == 0));
    }
}
