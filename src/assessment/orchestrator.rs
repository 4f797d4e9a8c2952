//! Assessment orchestrator: owns one session and runs its turns.
//!
//! A turn feeds one event through the stage policy, presents the resulting
//! messages with pacing, commits the new session, and then performs the
//! external effect (gateway call or store write), if any, feeding its
//! result back into the policy. Only one turn runs at a time per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gateway::AnalysisGateway;
use super::model::{
    AnalysisKind, AssessmentSession, FocusGroup, Message, QuickOption, Role,
};
use super::policy::{self, AnalysisFailure, Effect, Event};
use super::report::WellnessReport;
use super::script::RETRY_VALUE;
use super::sequencer::Pacer;
use super::state::Stage;
use crate::error::AssessmentError;
use crate::store::AssessmentStore;

/// Capacity of the per-session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 2 * 60 * 60;
const DEFAULT_COMPLETED_RETENTION_SECS: u64 = 15 * 60;
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// A failed external operation as shown to the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: AnalysisKind,
    pub reason: String,
}

/// Live updates pushed to subscribers while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Message { message: Message },
    Composing { active: bool },
    QuickOptions { options: Vec<QuickOption> },
    StageChanged { stage: Stage, label: String, progress: usize },
    TurnFailed { failure: TurnFailure },
    Completed { record_id: Uuid, final_group: FocusGroup },
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Ready for the next input.
    AwaitingInput,
    /// An external operation failed; a retry is offered.
    Failed { failure: TurnFailure },
    Completed,
}

/// Summary of one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    /// Messages appended during the turn, in order.
    pub messages: Vec<Message>,
    pub outcome: TurnOutcome,
}

/// Render state handed to front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub stage: Stage,
    pub stage_label: String,
    pub progress: usize,
    pub transcript: Vec<Message>,
    pub quick_options: Vec<QuickOption>,
    pub composing: bool,
    pub accepting_input: bool,
    pub input_hint: String,
    pub awaiting: Option<AnalysisKind>,
    pub last_failure: Option<TurnFailure>,
    pub probable_groups: Vec<FocusGroup>,
    pub final_group: Option<FocusGroup>,
    pub report: Option<WellnessReport>,
    pub record_id: Option<Uuid>,
}

/// Collaborators shared by every orchestrator.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub gateway: Arc<dyn AnalysisGateway>,
    pub store: Arc<dyn AssessmentStore>,
    pub pacer: Arc<dyn Pacer>,
}

#[derive(Debug, Default)]
struct Presentation {
    quick_options: Vec<QuickOption>,
    composing: bool,
    last_failure: Option<TurnFailure>,
}

/// Drives one session. Cloning shares the same session.
///
/// Every turn runs on its own task, so a caller that stops waiting (an HTTP
/// client hanging up, a timed-out future) never leaves a turn half done.
#[derive(Clone)]
pub struct AssessmentOrchestrator {
    core: Arc<SessionCore>,
}

struct SessionCore {
    id: Uuid,
    session: RwLock<AssessmentSession>,
    presentation: RwLock<Presentation>,
    turn: Mutex<()>,
    in_flight: AtomicBool,
    last_activity: RwLock<Instant>,
    deps: OrchestratorDeps,
    events: broadcast::Sender<SessionEvent>,
}

impl AssessmentOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self::with_session(AssessmentSession::new(Uuid::new_v4()), deps)
    }

    pub fn with_session(session: AssessmentSession, deps: OrchestratorDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            core: Arc::new(SessionCore {
                id: session.id,
                session: RwLock::new(session),
                presentation: RwLock::new(Presentation::default()),
                turn: Mutex::new(()),
                in_flight: AtomicBool::new(false),
                last_activity: RwLock::new(Instant::now()),
                deps,
                events,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    /// Current session value.
    pub async fn session(&self) -> AssessmentSession {
        self.core.session.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let core = &self.core;
        let session = core.session.read().await.clone();
        let presentation = core.presentation.read().await;
        let in_flight = core.in_flight.load(Ordering::SeqCst);
        SessionSnapshot {
            id: session.id,
            stage: session.stage,
            stage_label: session.stage.label().to_string(),
            progress: session.stage.index(),
            accepting_input: !in_flight && policy::accepts_input(&session),
            input_hint: policy::input_hint(&session).to_string(),
            quick_options: presentation.quick_options.clone(),
            composing: presentation.composing,
            awaiting: session.awaiting,
            last_failure: presentation.last_failure.clone(),
            probable_groups: session.probable_groups,
            final_group: session.final_group,
            report: session.report_data,
            record_id: session.record_id,
            transcript: session.transcript,
        }
    }

    /// Open the conversation with the greeting.
    pub async fn start(&self) -> Result<TurnReport, AssessmentError> {
        self.drive(Event::Start).await
    }

    /// Submit typed text or a quick-option value.
    ///
    /// The retry option's value re-issues a failed operation instead of
    /// being recorded as an answer.
    pub async fn submit(&self, input: &str) -> Result<TurnReport, AssessmentError> {
        let pending = self.core.session.read().await.awaiting;
        if pending.is_some() && input.trim().eq_ignore_ascii_case(RETRY_VALUE) {
            return self.retry().await;
        }
        self.drive(Event::UserInput(input.to_string())).await
    }

    /// Re-issue the pending external operation.
    pub async fn retry(&self) -> Result<TurnReport, AssessmentError> {
        self.drive(Event::Retry).await
    }

    /// Whether the session has been left alone past its limit.
    ///
    /// A session with a turn running is never expired.
    pub async fn is_expired(&self, limits: &SessionLimits, now: Instant) -> bool {
        let core = &self.core;
        if core.in_flight.load(Ordering::SeqCst) {
            return false;
        }
        let idle = now.saturating_duration_since(*core.last_activity.read().await);
        let limit = if core.session.read().await.is_complete() {
            limits.completed_retention
        } else {
            limits.idle_timeout
        };
        idle >= limit
    }

    fn turn_in_flight(&self) -> bool {
        self.core.in_flight.load(Ordering::SeqCst)
    }

    async fn drive(&self, first: Event) -> Result<TurnReport, AssessmentError> {
        let core = Arc::clone(&self.core);
        let id = core.id;
        match tokio::spawn(async move { core.drive(first).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(AssessmentError::Interrupted { id }),
        }
    }
}

impl SessionCore {
    async fn drive(&self, first: Event) -> Result<TurnReport, AssessmentError> {
        let _turn = self
            .turn
            .try_lock()
            .map_err(|_| AssessmentError::TurnInFlight { id: self.id })?;
        self.in_flight.store(true, Ordering::SeqCst);
        self.touch().await;
        let result = self.run_turn(first).await;
        self.touch().await;
        self.in_flight.store(false, Ordering::SeqCst);
        self.set_composing(false).await;
        result
    }

    async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    async fn run_turn(&self, first: Event) -> Result<TurnReport, AssessmentError> {
        let mut messages = Vec::new();
        let mut failure = None;
        let mut next = Some(first);

        while let Some(event) = next.take() {
            let current = self.session.read().await.clone();
            let transition = match policy::transition(&current, &event) {
                Ok(t) => t,
                Err(e) => {
                    debug!(session_id = %self.id, stage = %current.stage, error = %e, "Event rejected");
                    return Err(e.into());
                }
            };

            self.present(&transition.effects, &mut messages).await;

            let stage_before = current.stage;
            *self.session.write().await = transition.session.clone();
            if transition.session.stage != stage_before {
                info!(
                    session_id = %self.id,
                    from = %stage_before,
                    to = %transition.session.stage,
                    "Stage advanced"
                );
            }
            if let (Some(record_id), Some(final_group), Stage::Completed) = (
                transition.session.record_id,
                transition.session.final_group,
                transition.session.stage,
            ) {
                if stage_before != Stage::Completed {
                    self.emit(SessionEvent::Completed {
                        record_id,
                        final_group,
                    });
                }
            }

            next = match transition.external() {
                Some(effect) => match self.execute(effect).await {
                    Ok(event) => Some(event),
                    Err(f) => {
                        self.record_failure(&f).await;
                        failure = Some(TurnFailure {
                            kind: f.kind,
                            reason: f.reason.clone(),
                        });
                        Some(Event::AnalysisFailed(f))
                    }
                },
                None => None,
            };
        }

        let outcome = match failure {
            Some(failure) => TurnOutcome::Failed { failure },
            None if self.session.read().await.is_complete() => TurnOutcome::Completed,
            None => TurnOutcome::AwaitingInput,
        };
        Ok(TurnReport { messages, outcome })
    }

    /// Play out the local effects of a transition, pacing bot messages.
    async fn present(&self, effects: &[Effect], delivered: &mut Vec<Message>) {
        for effect in effects {
            match effect {
                Effect::Deliver { message, pace } => {
                    if message.role != Role::User {
                        self.set_composing(true).await;
                        self.deps.pacer.pause(*pace).await;
                    }
                    self.emit(SessionEvent::Message {
                        message: message.clone(),
                    });
                    delivered.push(message.clone());
                }
                Effect::OfferQuickOptions(options) => {
                    self.presentation.write().await.quick_options = options.clone();
                    self.emit(SessionEvent::QuickOptions {
                        options: options.clone(),
                    });
                }
                Effect::ClearQuickOptions => {
                    self.presentation.write().await.quick_options.clear();
                    self.emit(SessionEvent::QuickOptions {
                        options: Vec::new(),
                    });
                }
                Effect::StageChanged(stage) => {
                    self.emit(SessionEvent::StageChanged {
                        stage: *stage,
                        label: stage.label().to_string(),
                        progress: stage.index(),
                    });
                }
                Effect::InferGroups(_) | Effect::SynthesizeReport(_) | Effect::Persist(_) => {}
            }
        }
        self.set_composing(false).await;
    }

    /// Perform an external effect and translate its result into an event.
    async fn execute(&self, effect: &Effect) -> Result<Event, AnalysisFailure> {
        self.set_composing(true).await;
        self.presentation.write().await.last_failure = None;

        let result = match effect {
            Effect::InferGroups(request) => {
                info!(session_id = %self.id, kind = %AnalysisKind::GroupInference, "Inferring focus groups");
                self.deps
                    .gateway
                    .infer_groups(request)
                    .await
                    .map(Event::GroupsInferred)
                    .map_err(|e| AnalysisFailure {
                        kind: e.call(),
                        reason: e.to_string(),
                    })
            }
            Effect::SynthesizeReport(request) => {
                info!(session_id = %self.id, kind = %AnalysisKind::ReportSynthesis, "Synthesizing report");
                self.deps
                    .gateway
                    .synthesize_report(request)
                    .await
                    .map(Event::ReportSynthesized)
                    .map_err(|e| AnalysisFailure {
                        kind: e.call(),
                        reason: e.to_string(),
                    })
            }
            Effect::Persist(record) => {
                info!(session_id = %self.id, kind = %AnalysisKind::Persistence, "Storing assessment");
                self.deps
                    .store
                    .create_assessment(record.clone())
                    .await
                    .map(|stored| Event::Persisted {
                        record_id: stored.id,
                    })
                    .map_err(|e| AnalysisFailure {
                        kind: AnalysisKind::Persistence,
                        reason: e.to_string(),
                    })
            }
            other => Err(AnalysisFailure {
                kind: AnalysisKind::GroupInference,
                reason: format!("not an external effect: {other:?}"),
            }),
        };

        self.set_composing(false).await;
        result
    }

    async fn record_failure(&self, failure: &AnalysisFailure) {
        warn!(
            session_id = %self.id,
            kind = %failure.kind,
            reason = %failure.reason,
            "External operation failed"
        );
        let failure = TurnFailure {
            kind: failure.kind,
            reason: failure.reason.clone(),
        };
        self.presentation.write().await.last_failure = Some(failure.clone());
        self.emit(SessionEvent::TurnFailed { failure });
    }

    async fn set_composing(&self, active: bool) {
        let mut presentation = self.presentation.write().await;
        if presentation.composing != active {
            presentation.composing = active;
            drop(presentation);
            self.emit(SessionEvent::Composing { active });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// How long sessions are kept in memory without activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// An unfinished session idle this long is dropped.
    pub idle_timeout: Duration,
    /// A completed session is dropped this long after its last turn.
    pub completed_retention: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            completed_retention: Duration::from_secs(DEFAULT_COMPLETED_RETENTION_SECS),
        }
    }
}

/// All live sessions of a server process.
pub struct AssessmentRegistry {
    deps: OrchestratorDeps,
    limits: SessionLimits,
    sessions: RwLock<HashMap<Uuid, Arc<AssessmentOrchestrator>>>,
}

impl AssessmentRegistry {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self::with_limits(deps, SessionLimits::default())
    }

    pub fn with_limits(deps: OrchestratorDeps, limits: SessionLimits) -> Self {
        Self {
            deps,
            limits,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create and register a fresh session. The caller starts it.
    pub async fn create(&self) -> Arc<AssessmentOrchestrator> {
        let orchestrator = Arc::new(AssessmentOrchestrator::new(self.deps.clone()));
        self.sessions
            .write()
            .await
            .insert(orchestrator.id(), orchestrator.clone());
        info!(session_id = %orchestrator.id(), "Assessment session created");
        orchestrator
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<AssessmentOrchestrator>, AssessmentError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AssessmentError::NotFound { id })
    }

    pub fn store(&self) -> &Arc<dyn AssessmentStore> {
        &self.deps.store
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions past their limits. Returns how many were removed.
    ///
    /// Finished assessments stay readable through the store.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        for (id, orchestrator) in self.sessions.read().await.iter() {
            if orchestrator.is_expired(&self.limits, now).await {
                expired.push(*id);
            }
        }
        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        // A turn may have started since the scan
        sessions.retain(|id, o| !expired.contains(id) || o.turn_in_flight());
        let evicted = before - sessions.len();
        info!(evicted, remaining = sessions.len(), "Evicted expired assessment sessions");
        evicted
    }
}

/// Spawn a background task that periodically evicts expired sessions.
pub fn spawn_eviction_task(registry: Arc<AssessmentRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            interval.tick().await;
            registry.evict_expired().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::assessment::gateway::{GroupInference, GroupInferenceRequest, ReportRequest};
    use crate::assessment::report::fixtures::report;
    use crate::assessment::script;
    use crate::assessment::sequencer::InstantPacer;
    use crate::error::{DatabaseError, GatewayError};
    use crate::store::{
        AssessmentFilter, AssessmentRecord, LibSqlBackend, NewAssessmentRecord,
    };

    /// Gateway returning scripted results and recording requests.
    #[derive(Default)]
    struct FakeGateway {
        inferences: StdMutex<VecDeque<Result<GroupInference, GatewayError>>>,
        reports: StdMutex<VecDeque<Result<WellnessReport, GatewayError>>>,
        inference_requests: StdMutex<Vec<GroupInferenceRequest>>,
        report_requests: StdMutex<Vec<ReportRequest>>,
        delay: Option<Duration>,
    }

    impl FakeGateway {
        fn happy() -> Self {
            let gw = Self::default();
            gw.push_inference(Ok(GroupInference::new(
                [FocusGroup::AnxietyManagement, FocusGroup::WorkplaceStress],
                "worry and deadlines",
            )
            .unwrap()));
            gw.push_report(Ok(report()));
            gw
        }

        fn push_inference(&self, result: Result<GroupInference, GatewayError>) {
            self.inferences.lock().unwrap().push_back(result);
        }

        fn push_report(&self, result: Result<WellnessReport, GatewayError>) {
            self.reports.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl AnalysisGateway for FakeGateway {
        async fn infer_groups(
            &self,
            request: &GroupInferenceRequest,
        ) -> Result<GroupInference, GatewayError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inference_requests.lock().unwrap().push(request.clone());
            self.inferences
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(GatewayError::Unavailable {
                        call: AnalysisKind::GroupInference,
                        reason: "no scripted response".into(),
                    })
                })
        }

        async fn synthesize_report(
            &self,
            request: &ReportRequest,
        ) -> Result<WellnessReport, GatewayError> {
            self.report_requests.lock().unwrap().push(request.clone());
            self.reports.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(GatewayError::Unavailable {
                    call: AnalysisKind::ReportSynthesis,
                    reason: "no scripted response".into(),
                })
            })
        }
    }

    /// Store that fails the first `failures` writes, then delegates.
    struct FlakyStore {
        inner: LibSqlBackend,
        failures: StdMutex<usize>,
    }

    #[async_trait]
    impl AssessmentStore for FlakyStore {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.inner.run_migrations().await
        }

        async fn create_assessment(
            &self,
            record: NewAssessmentRecord,
        ) -> Result<AssessmentRecord, DatabaseError> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(DatabaseError::Query("disk I/O error".into()));
                }
            }
            self.inner.create_assessment(record).await
        }

        async fn get_assessment(
            &self,
            id: Uuid,
        ) -> Result<Option<AssessmentRecord>, DatabaseError> {
            self.inner.get_assessment(id).await
        }

        async fn filter_assessments(
            &self,
            filter: &AssessmentFilter,
        ) -> Result<Vec<AssessmentRecord>, DatabaseError> {
            self.inner.filter_assessments(filter).await
        }
    }

    async fn orchestrator_with(
        gateway: Arc<FakeGateway>,
        store: Arc<dyn AssessmentStore>,
    ) -> AssessmentOrchestrator {
        AssessmentOrchestrator::new(OrchestratorDeps {
            gateway,
            store,
            pacer: Arc::new(InstantPacer),
        })
    }

    async fn memory_store() -> Arc<dyn AssessmentStore> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    const OPEN_ENDED: [&str; 4] = [
        "honestly exhausted",
        "deadlines at work",
        "people who understand",
        "she looks like she is waiting for bad news",
    ];

    async fn answer_through_open_ended(o: &AssessmentOrchestrator) -> TurnReport {
        o.start().await.unwrap();
        o.submit("30").await.unwrap();
        o.submit("female").await.unwrap();
        let mut last = None;
        for text in OPEN_ENDED {
            last = Some(o.submit(text).await.unwrap());
        }
        last.unwrap()
    }

    async fn run_full_session(o: &AssessmentOrchestrator) -> TurnReport {
        answer_through_open_ended(o).await;
        let mut last = None;
        for answer in ["2", "3", "1", "4", "2", "3"] {
            last = Some(o.submit(answer).await.unwrap());
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn full_session_completes_and_persists() {
        let gateway = Arc::new(FakeGateway::happy());
        let store = memory_store().await;
        let o = orchestrator_with(gateway.clone(), store.clone()).await;

        let last = run_full_session(&o).await;
        assert_eq!(last.outcome, TurnOutcome::Completed);

        let snap = o.snapshot().await;
        assert_eq!(snap.stage, Stage::Completed);
        assert_eq!(snap.final_group, Some(FocusGroup::WorkplaceStress));
        assert!(snap.report.is_some());
        assert!(!snap.accepting_input);
        assert!(!snap.composing);

        let record_id = snap.record_id.unwrap();
        let stored = store.get_assessment(record_id).await.unwrap().unwrap();
        assert_eq!(stored.record.session_id, o.id());
        assert_eq!(stored.record.final_focus_group, FocusGroup::WorkplaceStress);
        assert_eq!(stored.record.psychometric_scores[&FocusGroup::AnxietyManagement], 6);
        assert_eq!(stored.record.psychometric_scores[&FocusGroup::WorkplaceStress], 9);

        // Narrowing was invoked once with exactly the four answers, in order
        let requests = gateway.inference_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].responses, OPEN_ENDED.map(String::from));
    }

    #[tokio::test]
    async fn closing_messages_follow_completion() {
        let o = orchestrator_with(Arc::new(FakeGateway::happy()), memory_store().await).await;
        let last = run_full_session(&o).await;
        let texts: Vec<&str> = last.messages.iter().filter_map(|m| m.text()).collect();
        assert_eq!(
            &texts[texts.len() - 2..],
            &[script::CLOSING[0].text, script::CLOSING[1].text]
        );
    }

    #[tokio::test]
    async fn malformed_inference_fails_turn_without_advancing() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.push_inference(Err(GatewayError::ContractViolation {
            call: AnalysisKind::GroupInference,
            reason: "expected 2 probable groups, got 3".into(),
        }));
        let o = orchestrator_with(gateway.clone(), memory_store().await).await;

        let report = answer_through_open_ended(&o).await;
        match &report.outcome {
            TurnOutcome::Failed { failure } => {
                assert_eq!(failure.kind, AnalysisKind::GroupInference);
                assert!(failure.reason.contains("got 3"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let snap = o.snapshot().await;
        assert_eq!(snap.stage, Stage::Narrowing);
        assert!(snap.probable_groups.is_empty());
        assert_eq!(snap.quick_options, script::retry_options());
        assert!(snap.last_failure.is_some());

        // Typed answers are refused until the retry succeeds
        let err = o.submit("hello?").await.unwrap_err();
        assert!(matches!(err, AssessmentError::Rejected(_)));

        gateway.push_inference(Ok(GroupInference::new(
            [FocusGroup::WorkplaceStress, FocusGroup::PostpartumDepression],
            "r",
        )
        .unwrap()));
        let retried = o.submit(RETRY_VALUE).await.unwrap();
        assert_eq!(retried.outcome, TurnOutcome::AwaitingInput);

        let snap = o.snapshot().await;
        assert_eq!(snap.stage, Stage::Psychometric);
        assert!(snap.last_failure.is_none());
        assert_eq!(
            snap.probable_groups,
            vec![FocusGroup::WorkplaceStress, FocusGroup::PostpartumDepression]
        );
        // The retry keyword is not recorded as an answer
        assert!(!o.session().await.user_messages().contains(&RETRY_VALUE.to_string()));
        assert_eq!(gateway.inference_requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn persistence_failure_retries_store_only() {
        let gateway = Arc::new(FakeGateway::happy());
        let store = Arc::new(FlakyStore {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            failures: StdMutex::new(1),
        });
        let o = orchestrator_with(gateway.clone(), store.clone()).await;

        let last = run_full_session(&o).await;
        assert!(matches!(
            last.outcome,
            TurnOutcome::Failed { failure: TurnFailure { kind: AnalysisKind::Persistence, .. } }
        ));
        let session = o.session().await;
        assert_eq!(session.stage, Stage::Psychometric);
        assert!(session.report_data.is_none());
        assert!(session.pending_report.is_some());

        let retried = o.retry().await.unwrap();
        assert_eq!(retried.outcome, TurnOutcome::Completed);
        assert_eq!(gateway.report_requests.lock().unwrap().len(), 1);

        let members = store
            .filter_assessments(&AssessmentFilter::completed_in(FocusGroup::WorkplaceStress))
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn replay_produces_identical_report_request() {
        let mut requests = Vec::new();
        for _ in 0..2 {
            let gateway = Arc::new(FakeGateway::happy());
            let o = orchestrator_with(gateway.clone(), memory_store().await).await;
            run_full_session(&o).await;
            let recorded = gateway.report_requests.lock().unwrap().clone();
            assert_eq!(recorded.len(), 1);
            requests.push(recorded[0].clone());
        }
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test]
    async fn concurrent_input_is_rejected_while_turn_in_flight() {
        let gateway = Arc::new(FakeGateway {
            delay: Some(Duration::from_millis(200)),
            ..FakeGateway::happy()
        });
        let o = Arc::new(orchestrator_with(gateway, memory_store().await).await);
        o.start().await.unwrap();
        for text in ["30", "female", "a", "b", "c"] {
            o.submit(text).await.unwrap();
        }

        let background = {
            let o = o.clone();
            tokio::spawn(async move { o.submit("d").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!o.snapshot().await.accepting_input);
        let err = o.submit("interrupting").await.unwrap_err();
        assert!(matches!(err, AssessmentError::TurnInFlight { .. }));

        let report = background.await.unwrap().unwrap();
        assert_eq!(report.outcome, TurnOutcome::AwaitingInput);
        assert_eq!(o.snapshot().await.stage, Stage::Psychometric);
    }

    #[tokio::test]
    async fn events_are_broadcast_in_order() {
        let o = orchestrator_with(Arc::new(FakeGateway::happy()), memory_store().await).await;
        let mut rx = o.subscribe();
        o.start().await.unwrap();
        o.submit("30").await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let messages: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Message { message } => Some(message.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(messages, (0..messages.len() as u64).collect::<Vec<_>>());
        assert!(events.contains(&SessionEvent::Composing { active: true }));
        assert!(events.contains(&SessionEvent::QuickOptions {
            options: script::gender_options()
        }));
    }

    #[tokio::test]
    async fn rejected_start_leaves_session_untouched() {
        let o = orchestrator_with(Arc::new(FakeGateway::happy()), memory_store().await).await;
        o.start().await.unwrap();
        let before = o.session().await;
        assert!(o.start().await.is_err());
        assert_eq!(o.session().await, before);
    }

    #[tokio::test]
    async fn registry_creates_and_finds_sessions() {
        let registry = AssessmentRegistry::new(OrchestratorDeps {
            gateway: Arc::new(FakeGateway::happy()),
            store: memory_store().await,
            pacer: Arc::new(InstantPacer),
        });
        let o = registry.create().await;
        assert_eq!(registry.get(o.id()).await.unwrap().id(), o.id());
        assert!(matches!(
            registry.get(Uuid::new_v4()).await,
            Err(AssessmentError::NotFound { .. })
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_strand_the_turn() {
        let gateway = Arc::new(FakeGateway {
            delay: Some(Duration::from_millis(300)),
            ..FakeGateway::happy()
        });
        let o = orchestrator_with(gateway, memory_store().await).await;
        o.start().await.unwrap();
        for text in ["30", "female", "a", "b", "c"] {
            o.submit(text).await.unwrap();
        }

        // The caller gives up while group inference is still running
        let abandoned = tokio::time::timeout(Duration::from_millis(50), o.submit("d")).await;
        assert!(abandoned.is_err());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !o.snapshot().await.accepting_input {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("turn never finished after its caller went away");

        let snap = o.snapshot().await;
        assert_eq!(snap.stage, Stage::Psychometric);
        assert!(!snap.composing);
        assert!(snap.last_failure.is_none());
        assert_eq!(snap.probable_groups.len(), 2);
        assert_eq!(o.submit("2").await.unwrap().outcome, TurnOutcome::AwaitingInput);
    }

    fn registry_with(
        gateway: Arc<FakeGateway>,
        store: Arc<dyn AssessmentStore>,
        limits: SessionLimits,
    ) -> AssessmentRegistry {
        AssessmentRegistry::with_limits(
            OrchestratorDeps {
                gateway,
                store,
                pacer: Arc::new(InstantPacer),
            },
            limits,
        )
    }

    #[tokio::test]
    async fn completed_sessions_are_evicted_before_idle_ones() {
        let store = memory_store().await;
        let registry = registry_with(
            Arc::new(FakeGateway::happy()),
            store.clone(),
            SessionLimits {
                idle_timeout: Duration::from_secs(3600),
                completed_retention: Duration::ZERO,
            },
        );
        let finished = registry.create().await;
        run_full_session(&finished).await;
        let open = registry.create().await;
        open.start().await.unwrap();

        assert_eq!(registry.evict_expired().await, 1);
        assert!(matches!(
            registry.get(finished.id()).await,
            Err(AssessmentError::NotFound { .. })
        ));
        assert!(registry.get(open.id()).await.is_ok());

        // The finished assessment is still in the store
        let record_id = finished.session().await.record_id.unwrap();
        assert!(store.get_assessment(record_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_unless_a_turn_is_running() {
        let gateway = Arc::new(FakeGateway {
            delay: Some(Duration::from_millis(400)),
            ..FakeGateway::happy()
        });
        let registry = registry_with(
            gateway,
            memory_store().await,
            SessionLimits {
                idle_timeout: Duration::from_millis(100),
                completed_retention: Duration::from_secs(3600),
            },
        );
        let busy = registry.create().await;
        busy.start().await.unwrap();
        for text in ["30", "female", "a", "b", "c"] {
            busy.submit(text).await.unwrap();
        }
        let idle = registry.create().await;
        idle.start().await.unwrap();

        let turn = {
            let busy = busy.clone();
            tokio::spawn(async move { busy.submit("d").await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(registry.evict_expired().await, 1);
        assert!(registry.get(idle.id()).await.is_err());
        assert!(registry.get(busy.id()).await.is_ok());

        turn.await.unwrap().unwrap();
        assert_eq!(registry.evict_expired().await, 0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(registry.evict_expired().await, 1);
        assert_eq!(registry.len().await, 0);
    }
}
