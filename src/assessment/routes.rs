//! WebSocket + REST endpoints for assessment sessions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::community::{self, GroupInfo};
use super::model::FocusGroup;
use super::orchestrator::{
    AssessmentOrchestrator, AssessmentRegistry, SessionSnapshot, TurnOutcome, TurnReport,
};
use super::report::WellnessReport;
use crate::error::{AssessmentError, DatabaseError};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AssessmentRegistry>,
}

/// Build the Axum router with assessment REST and WebSocket routes.
pub fn assessment_routes(registry: Arc<AssessmentRegistry>) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/health", get(health))
        .route("/api/assessments", post(create_assessment))
        .route("/api/assessments/{id}", get(get_assessment))
        .route("/api/assessments/{id}/input", post(submit_input))
        .route("/api/assessments/{id}/retry", post(retry))
        .route("/api/assessments/{id}/report", get(get_report))
        .route("/api/assessments/{id}/community", get(get_community))
        .route("/api/groups", get(list_groups))
        .route("/api/groups/{group}/members", get(list_members))
        .route("/ws/assessments/{id}", get(ws_handler))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Handler error rendered as `{ "error": ... }` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    Assessment(AssessmentError),
    Database(DatabaseError),
    NotFound(String),
}

impl From<AssessmentError> for ApiError {
    fn from(e: AssessmentError) -> Self {
        Self::Assessment(e)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Assessment(AssessmentError::NotFound { .. }) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Assessment(AssessmentError::TurnInFlight { .. }) => StatusCode::CONFLICT,
            Self::Assessment(AssessmentError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Assessment(AssessmentError::Interrupted { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Assessment(e) => e.to_string(),
            Self::Database(e) => e.to_string(),
            Self::NotFound(what) => what.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.message(), "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.message() }))).into_response()
    }
}

// ── Payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InputBody {
    content: String,
}

/// Result of a turn plus the state it left behind.
#[derive(Debug, Serialize, Deserialize)]
pub struct TurnResponse {
    pub outcome: TurnOutcome,
    pub messages: Vec<super::model::Message>,
    pub snapshot: SessionSnapshot,
}

impl TurnResponse {
    async fn build(report: TurnReport, orchestrator: &AssessmentOrchestrator) -> Self {
        Self {
            outcome: report.outcome,
            messages: report.messages,
            snapshot: orchestrator.snapshot().await,
        }
    }
}

/// Messages a WebSocket client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Message { content: String },
    Retry,
}

/// Server frames that are not session events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Snapshot { snapshot: SessionSnapshot },
    Error { status: u16, message: String },
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mindful-match"
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn create_assessment(State(state): State<AppState>) -> Result<Response, ApiError> {
    let orchestrator = state.registry.create().await;
    let report = orchestrator.start().await?;
    let body = TurnResponse::build(report, &orchestrator).await;
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn get_assessment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let orchestrator = state.registry.get(id).await?;
    Ok(Json(orchestrator.snapshot().await))
}

async fn submit_input(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<InputBody>,
) -> Result<Json<TurnResponse>, ApiError> {
    let orchestrator = state.registry.get(id).await?;
    let report = orchestrator.submit(&body.content).await?;
    Ok(Json(TurnResponse::build(report, &orchestrator).await))
}

async fn retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TurnResponse>, ApiError> {
    let orchestrator = state.registry.get(id).await?;
    let report = orchestrator.retry().await?;
    Ok(Json(TurnResponse::build(report, &orchestrator).await))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WellnessReport>, ApiError> {
    let orchestrator = state.registry.get(id).await?;
    orchestrator
        .session()
        .await
        .report_data
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Report for assessment {id} is not ready")))
}

async fn get_community(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<community::CommunityView>, ApiError> {
    let session = state.registry.get(id).await?.session().await;
    let group = session.final_group.ok_or_else(|| {
        ApiError::NotFound(format!("Assessment {id} has not been matched to a group yet"))
    })?;
    let view =
        community::group_members(state.registry.store().as_ref(), group, session.record_id)
            .await?;
    Ok(Json(view))
}

// ── Groups ──────────────────────────────────────────────────────────────

async fn list_groups() -> Json<Vec<GroupInfo>> {
    Json(FocusGroup::ALL.into_iter().map(GroupInfo::from).collect())
}

async fn list_members(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<community::CommunityView>, ApiError> {
    let group: FocusGroup = group.parse().map_err(ApiError::NotFound)?;
    let view = community::group_members(state.registry.store().as_ref(), group, None).await?;
    Ok(Json(view))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let orchestrator = state.registry.get(id).await?;
    info!(session_id = %id, "WebSocket client connecting");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, orchestrator)))
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(WsFrame::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS frame");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, orchestrator: Arc<AssessmentOrchestrator>) {
    let id = orchestrator.id();
    info!(session_id = %id, "WebSocket client connected");

    // Subscribe before the initial snapshot so no event falls in between
    let mut rx = orchestrator.subscribe();
    let snapshot = ServerFrame::Snapshot {
        snapshot: orchestrator.snapshot().await,
    };
    if !send_json(&mut socket, &snapshot).await {
        warn!("Failed to send initial snapshot, client disconnected");
        return;
    }

    // Turns run in their own task so events keep flowing while they do
    let (err_tx, mut err_rx) = mpsc::channel::<ServerFrame>(8);

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_json(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        let sync = ServerFrame::Snapshot {
                            snapshot: orchestrator.snapshot().await,
                        };
                        if !send_json(&mut socket, &sync).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            Some(frame) = err_rx.recv() => {
                if !send_json(&mut socket, &frame).await {
                    break;
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(WsFrame::Text(text))) => {
                        handle_client_message(&text, &orchestrator, &err_tx);
                    }
                    Some(Ok(WsFrame::Ping(data))) => {
                        if socket.send(WsFrame::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsFrame::Close(_))) | None => {
                        info!(session_id = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(session_id = %id, "WebSocket connection closed");
}

fn handle_client_message(
    text: &str,
    orchestrator: &Arc<AssessmentOrchestrator>,
    errors: &mpsc::Sender<ServerFrame>,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return;
        }
    };

    let orchestrator = orchestrator.clone();
    let errors = errors.clone();
    tokio::spawn(async move {
        let result = match message {
            ClientMessage::Message { content } => orchestrator.submit(&content).await,
            ClientMessage::Retry => orchestrator.retry().await,
        };
        if let Err(e) = result {
            let e = ApiError::from(e);
            let frame = ServerFrame::Error {
                status: e.status().as_u16(),
                message: e.message(),
            };
            let _ = errors.send(frame).await;
        }
    });
}
