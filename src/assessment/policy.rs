//! Stage policy: the pure decision function of the assessment.
//!
//! `transition` takes the current session and one event and returns the
//! next session together with an ordered list of effects. It performs no
//! I/O and never sleeps: pacing, gateway calls and persistence are carried
//! out by the orchestrator from the returned effects.

use std::time::Duration;

use uuid::Uuid;

use super::gateway::{GroupInference, GroupInferenceRequest, OPEN_ENDED_TOTAL, ReportRequest};
use super::model::{
    AnalysisKind, AssessmentSession, LikertAnswer, Message, MessageContent, QuickOption, Role,
};
use super::questions::{PsychSchedule, projective_image};
use super::report::WellnessReport;
use super::script::{self, BotLine};
use super::state::Stage;
use crate::store::{NewAssessmentRecord, RecordStatus};

/// Free-text answers collected before the projective image is shown.
pub const FREE_TEXT_ANSWERS: usize = 3;

/// Accepted age range, inclusive.
pub const AGE_RANGE: std::ops::RangeInclusive<u32> = 1..=120;

/// Inputs to the stage policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Open the conversation.
    Start,
    /// Typed text or a quick-option value.
    UserInput(String),
    GroupsInferred(GroupInference),
    ReportSynthesized(WellnessReport),
    Persisted { record_id: Uuid },
    AnalysisFailed(AnalysisFailure),
    /// Re-issue the pending external operation.
    Retry,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::UserInput(_) => "user input",
            Self::GroupsInferred(_) => "groups inferred",
            Self::ReportSynthesized(_) => "report synthesized",
            Self::Persisted { .. } => "persisted",
            Self::AnalysisFailed(_) => "analysis failed",
            Self::Retry => "retry",
        }
    }
}

/// A failed external operation, reported back to the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisFailure {
    pub kind: AnalysisKind,
    pub reason: String,
}

/// Instructions for the orchestrator, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// A message just appended to the transcript and the pause before it is shown.
    Deliver { message: Message, pace: Duration },
    OfferQuickOptions(Vec<QuickOption>),
    ClearQuickOptions,
    StageChanged(Stage),
    InferGroups(GroupInferenceRequest),
    SynthesizeReport(ReportRequest),
    Persist(NewAssessmentRecord),
}

impl Effect {
    /// Whether this effect calls out of the process.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::InferGroups(_) | Self::SynthesizeReport(_) | Self::Persist(_)
        )
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub session: AssessmentSession,
    pub effects: Vec<Effect>,
}

impl Transition {
    /// The external effect, if any. It is always the last effect.
    pub fn external(&self) -> Option<&Effect> {
        self.effects.last().filter(|e| e.is_external())
    }
}

/// Reasons the policy refuses an event. The session is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("the assessment has already started")]
    AlreadyStarted,

    #[error("the assessment has not started yet")]
    NotStarted,

    #[error("waiting for {0} to finish")]
    AwaitingAnalysis(AnalysisKind),

    #[error("the assessment is already complete")]
    SessionCompleted,

    #[error("there is no pending operation to retry")]
    NothingToRetry,

    #[error("stage {stage} does not accept input")]
    InputNotAccepted { stage: Stage },

    #[error("unexpected {event} event (pending: {pending:?})")]
    UnexpectedEvent {
        event: &'static str,
        pending: Option<AnalysisKind>,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

/// Whether the session would accept a `UserInput` right now.
pub fn accepts_input(session: &AssessmentSession) -> bool {
    !session.transcript.is_empty()
        && session.awaiting.is_none()
        && !session.stage.is_terminal()
        && session.stage != Stage::Narrowing
}

/// Placeholder hint for the input box.
pub fn input_hint(session: &AssessmentSession) -> &'static str {
    match session.stage {
        Stage::BasicInfo if session.basic_info.age.is_none() => script::AGE_HINT,
        Stage::OpenEnded if session.open_ended_responses.len() == FREE_TEXT_ANSWERS => {
            script::IMAGE_HINT
        }
        _ => script::DEFAULT_HINT,
    }
}

/// Apply `event` to `session`.
pub fn transition(session: &AssessmentSession, event: &Event) -> Result<Transition, PolicyError> {
    let mut turn = Turn::new(session);
    match event {
        Event::Start => turn.start()?,
        Event::UserInput(text) => turn.user_input(text)?,
        Event::GroupsInferred(inference) => {
            turn.expect_pending(event, AnalysisKind::GroupInference)?;
            turn.groups_inferred(inference)?;
        }
        Event::ReportSynthesized(report) => {
            turn.expect_pending(event, AnalysisKind::ReportSynthesis)?;
            turn.report_synthesized(report)?;
        }
        Event::Persisted { record_id } => {
            turn.expect_pending(event, AnalysisKind::Persistence)?;
            turn.persisted(*record_id)?;
        }
        Event::AnalysisFailed(failure) => {
            turn.expect_pending(event, failure.kind)?;
            turn.analysis_failed(failure);
        }
        Event::Retry => turn.retry()?,
    }
    Ok(turn.finish())
}

/// Working copy of the session plus the effects accumulated so far.
struct Turn {
    session: AssessmentSession,
    effects: Vec<Effect>,
}

impl Turn {
    fn new(session: &AssessmentSession) -> Self {
        Self {
            session: session.clone(),
            effects: Vec::new(),
        }
    }

    fn finish(self) -> Transition {
        Transition {
            session: self.session,
            effects: self.effects,
        }
    }

    // ── Effect helpers ──────────────────────────────────────────────

    fn deliver(&mut self, role: Role, content: MessageContent, pace: Duration) {
        let message = self.session.push_message(role, content);
        self.effects.push(Effect::Deliver { message, pace });
    }

    fn say(&mut self, line: BotLine) {
        self.deliver(Role::Bot, MessageContent::Text(line.text.to_string()), line.pace);
    }

    fn say_all(&mut self, lines: &[BotLine]) {
        for line in lines {
            self.say(*line);
        }
    }

    fn echo(&mut self, text: &str) {
        self.deliver(Role::User, MessageContent::Text(text.to_string()), Duration::ZERO);
    }

    fn offer(&mut self, options: Vec<QuickOption>) {
        self.effects.push(Effect::OfferQuickOptions(options));
    }

    fn advance(&mut self) -> Result<(), PolicyError> {
        let stage = self.session.advance().map_err(PolicyError::InvalidTransition)?;
        self.effects.push(Effect::StageChanged(stage));
        Ok(())
    }

    fn expect_pending(&self, event: &Event, kind: AnalysisKind) -> Result<(), PolicyError> {
        if self.session.awaiting == Some(kind) {
            Ok(())
        } else {
            Err(PolicyError::UnexpectedEvent {
                event: event.name(),
                pending: self.session.awaiting,
            })
        }
    }

    /// Suspend on an external operation. Must be the last effect of the turn.
    fn request(&mut self, kind: AnalysisKind) -> Result<(), PolicyError> {
        let effect = match kind {
            AnalysisKind::GroupInference => Effect::InferGroups(group_request(&self.session)?),
            AnalysisKind::ReportSynthesis => {
                Effect::SynthesizeReport(report_request(&self.session)?)
            }
            AnalysisKind::Persistence => {
                let report = self.session.pending_report.as_ref().ok_or_else(|| {
                    PolicyError::InvalidTransition("no synthesized report to persist".into())
                })?;
                Effect::Persist(assessment_record(&self.session, report)?)
            }
        };
        self.session.awaiting = Some(kind);
        self.effects.push(effect);
        Ok(())
    }

    // ── Event handlers ──────────────────────────────────────────────

    fn start(&mut self) -> Result<(), PolicyError> {
        if !self.session.transcript.is_empty() {
            return Err(PolicyError::AlreadyStarted);
        }
        self.say_all(&script::GREETING);
        self.offer(script::age_options());
        Ok(())
    }

    fn user_input(&mut self, text: &str) -> Result<(), PolicyError> {
        if self.session.stage.is_terminal() {
            return Err(PolicyError::SessionCompleted);
        }
        if let Some(kind) = self.session.awaiting {
            return Err(PolicyError::AwaitingAnalysis(kind));
        }
        if self.session.transcript.is_empty() {
            return Err(PolicyError::NotStarted);
        }

        match self.session.stage {
            Stage::BasicInfo => {
                self.echo(text);
                self.effects.push(Effect::ClearQuickOptions);
                self.basic_info(text)
            }
            Stage::OpenEnded => {
                self.echo(text);
                self.effects.push(Effect::ClearQuickOptions);
                self.open_ended(text)
            }
            Stage::Psychometric if !self.session.psychometric_done() => {
                self.echo(text);
                self.effects.push(Effect::ClearQuickOptions);
                self.psychometric(text)
            }
            stage => Err(PolicyError::InputNotAccepted { stage }),
        }
    }

    fn basic_info(&mut self, text: &str) -> Result<(), PolicyError> {
        if self.session.basic_info.age.is_none() {
            match parse_age(text) {
                Some(age) => {
                    self.session.basic_info.age = Some(age);
                    self.say_all(&script::AGE_RECEIVED);
                    self.offer(script::gender_options());
                }
                None => {
                    self.say_all(&script::AGE_REPROMPT);
                    self.offer(script::age_options());
                }
            }
            return Ok(());
        }

        self.session.basic_info.gender = Some(text.trim().to_string());
        self.advance()?;
        self.say_all(&script::GENDER_RECEIVED);
        Ok(())
    }

    fn open_ended(&mut self, text: &str) -> Result<(), PolicyError> {
        self.session.open_ended_responses.push(text.to_string());
        let answered = self.session.open_ended_responses.len();

        if answered < FREE_TEXT_ANSWERS {
            self.say_all(&script::FREE_TEXT_FOLLOW_UPS[answered - 1]);
        } else if answered == FREE_TEXT_ANSWERS {
            self.say_all(&script::IMAGE_INTRO);
            self.deliver(
                Role::ImagePrompt,
                MessageContent::Image(projective_image(0)),
                script::IMAGE_PROMPT_PACE,
            );
        } else {
            self.advance()?;
            self.request(AnalysisKind::GroupInference)?;
        }
        Ok(())
    }

    fn psychometric(&mut self, text: &str) -> Result<(), PolicyError> {
        let answer: LikertAnswer = match text.parse() {
            Ok(answer) => answer,
            Err(_) => {
                self.say_all(&script::ANSWER_REPROMPT);
                self.offer(script::likert_options());
                return Ok(());
            }
        };

        let index = self.session.current_psych_question_index;
        let (group, _) = PsychSchedule::new(&self.session.probable_groups)
            .locate(index)
            .ok_or_else(|| {
                PolicyError::InvalidTransition(format!("no psychometric question at index {index}"))
            })?;
        *self.session.psychometric_scores.entry(group).or_insert(0) += answer.score();
        self.session.current_psych_question_index += 1;

        self.say(script::ANSWER_RECEIVED);
        if self.session.psychometric_done() {
            self.request(AnalysisKind::ReportSynthesis)?;
        } else {
            self.ask_question(script::DEFAULT_PACE)?;
        }
        Ok(())
    }

    fn ask_question(&mut self, pace: Duration) -> Result<(), PolicyError> {
        let index = self.session.current_psych_question_index;
        let question = PsychSchedule::new(&self.session.probable_groups)
            .question(index)
            .ok_or_else(|| {
                PolicyError::InvalidTransition(format!("no psychometric question at index {index}"))
            })?;
        self.deliver(Role::Bot, MessageContent::Text(question.text.to_string()), pace);
        self.offer(script::likert_options());
        Ok(())
    }

    fn groups_inferred(&mut self, inference: &GroupInference) -> Result<(), PolicyError> {
        if !self.session.probable_groups.is_empty() {
            return Err(PolicyError::InvalidTransition(
                "probable groups are already set".into(),
            ));
        }
        self.session.probable_groups = inference.probable_groups().to_vec();
        self.session.inference_reasoning = Some(inference.reasoning.clone());
        self.session.awaiting = None;
        self.advance()?;
        self.say_all(&script::GROUPS_INFERRED);
        self.ask_question(script::FIRST_QUESTION_PACE)
    }

    fn report_synthesized(&mut self, report: &WellnessReport) -> Result<(), PolicyError> {
        self.session.pending_report = Some(report.clone());
        self.request(AnalysisKind::Persistence)
    }

    fn persisted(&mut self, record_id: Uuid) -> Result<(), PolicyError> {
        let report = self.session.pending_report.take().ok_or_else(|| {
            PolicyError::InvalidTransition("no synthesized report to complete with".into())
        })?;
        let final_group = self.session.leading_group().ok_or_else(|| {
            PolicyError::InvalidTransition("no probable groups to choose from".into())
        })?;

        self.session.final_group = Some(final_group);
        self.session.report_data = Some(report);
        self.session.record_id = Some(record_id);
        self.session.awaiting = None;
        self.advance()?;
        self.effects.push(Effect::ClearQuickOptions);
        self.say_all(&script::CLOSING);
        Ok(())
    }

    fn analysis_failed(&mut self, failure: &AnalysisFailure) {
        let apology = match failure.kind {
            AnalysisKind::Persistence => script::SAVE_APOLOGY,
            AnalysisKind::GroupInference | AnalysisKind::ReportSynthesis => {
                script::ANALYSIS_APOLOGY
            }
        };
        self.say(apology);
        self.offer(script::retry_options());
    }

    fn retry(&mut self) -> Result<(), PolicyError> {
        let kind = self.session.awaiting.ok_or(PolicyError::NothingToRetry)?;
        self.effects.push(Effect::ClearQuickOptions);
        self.request(kind)
    }
}

/// Parse an age answer. Anything other than a whole number in range is refused.
fn parse_age(text: &str) -> Option<u32> {
    text.trim()
        .parse::<u32>()
        .ok()
        .filter(|age| AGE_RANGE.contains(age))
}

fn group_request(session: &AssessmentSession) -> Result<GroupInferenceRequest, PolicyError> {
    let responses: [String; OPEN_ENDED_TOTAL] = session
        .open_ended_responses
        .clone()
        .try_into()
        .map_err(|r: Vec<String>| {
            PolicyError::InvalidTransition(format!(
                "group inference needs {OPEN_ENDED_TOTAL} responses, have {}",
                r.len()
            ))
        })?;
    Ok(GroupInferenceRequest {
        age: session.basic_info.age,
        gender: session.basic_info.gender.clone(),
        responses,
    })
}

fn report_request(session: &AssessmentSession) -> Result<ReportRequest, PolicyError> {
    let final_group = session.leading_group().ok_or_else(|| {
        PolicyError::InvalidTransition("report requested before groups were inferred".into())
    })?;
    Ok(ReportRequest {
        age: session.basic_info.age,
        gender: session.basic_info.gender.clone(),
        final_group,
        probable_groups: session.probable_groups.clone(),
        user_messages: session.user_messages(),
        open_ended_responses: session.open_ended_responses.clone(),
        psychometric_scores: session.psychometric_scores.clone(),
    })
}

fn assessment_record(
    session: &AssessmentSession,
    report: &WellnessReport,
) -> Result<NewAssessmentRecord, PolicyError> {
    let final_group = session.leading_group().ok_or_else(|| {
        PolicyError::InvalidTransition("record requested before groups were inferred".into())
    })?;
    Ok(NewAssessmentRecord {
        session_id: session.id,
        age: session.basic_info.age,
        gender: session.basic_info.gender.clone(),
        conversation_history: session.transcript.clone(),
        probable_groups: session.probable_groups.clone(),
        final_focus_group: final_group,
        psychometric_scores: session.psychometric_scores.clone(),
        assessment_stage: Stage::Completed,
        psych_report: report.conversation_summary.clone(),
        full_report: report.clone(),
        status: RecordStatus::Completed,
    })
}
