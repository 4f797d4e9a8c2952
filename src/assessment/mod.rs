//! The assessment conversation: stages, policy, analysis and the session runtime.
//!
//! `policy` decides, `orchestrator` executes. Everything the policy needs
//! from the outside world arrives as an `Event`, and everything it wants
//! done leaves as an `Effect`.

pub mod community;
pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod prompts;
pub mod questions;
pub mod report;
pub mod routes;
pub mod script;
pub mod sequencer;
pub mod state;

pub use gateway::{AnalysisGateway, GatewayConfig, LlmAnalysisGateway};
pub use model::{AssessmentSession, FocusGroup};
pub use orchestrator::{
    AssessmentOrchestrator, AssessmentRegistry, OrchestratorDeps, SessionEvent, SessionLimits,
    SessionSnapshot, TurnOutcome, TurnReport, spawn_eviction_task,
};
pub use routes::assessment_routes;
pub use sequencer::{InstantPacer, Pacer, TokioPacer};
pub use state::Stage;
