//! Analysis gateway: the boundary to the external reasoning service.
//!
//! Two call shapes: group inference and report synthesis. Responses must
//! match their schema exactly; anything else is a `ContractViolation`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::model::{AnalysisKind, FocusGroup};
use super::prompts::{
    GROUP_INFERENCE_SYSTEM, REPORT_SYSTEM, group_inference_prompt, report_prompt,
};
use super::report::WellnessReport;
use crate::error::GatewayError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Open-ended answers collected before narrowing: 3 free text + 1 image response.
pub const OPEN_ENDED_TOTAL: usize = 4;

/// Number of probable groups the inference call must return.
pub const PROBABLE_GROUP_COUNT: usize = 2;

/// Input to group inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInferenceRequest {
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub responses: [String; OPEN_ENDED_TOTAL],
}

/// Validated group-inference result: two distinct groups, most likely first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGroupInference")]
pub struct GroupInference {
    probable_groups: [FocusGroup; PROBABLE_GROUP_COUNT],
    pub reasoning: String,
}

impl GroupInference {
    pub fn new(
        probable_groups: [FocusGroup; PROBABLE_GROUP_COUNT],
        reasoning: impl Into<String>,
    ) -> Result<Self, String> {
        if probable_groups[0] == probable_groups[1] {
            return Err(format!(
                "probable_groups must be distinct, got {} twice",
                probable_groups[0]
            ));
        }
        Ok(Self {
            probable_groups,
            reasoning: reasoning.into(),
        })
    }

    pub fn probable_groups(&self) -> &[FocusGroup; PROBABLE_GROUP_COUNT] {
        &self.probable_groups
    }
}

/// Input to report synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub final_group: FocusGroup,
    pub probable_groups: Vec<FocusGroup>,
    /// User-authored transcript messages, in order.
    pub user_messages: Vec<String>,
    pub open_ended_responses: Vec<String>,
    pub psychometric_scores: BTreeMap<FocusGroup, u32>,
}

/// The reasoning service as seen by the orchestrator.
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    async fn infer_groups(
        &self,
        request: &GroupInferenceRequest,
    ) -> Result<GroupInference, GatewayError>;

    async fn synthesize_report(
        &self,
        request: &ReportRequest,
    ) -> Result<WellnessReport, GatewayError>;
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upper bound on a single call.
    pub timeout: Duration,
    pub inference_max_tokens: u32,
    pub report_max_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            inference_max_tokens: 512,
            report_max_tokens: 4096,
        }
    }
}

/// `AnalysisGateway` backed by a chat-completion model.
pub struct LlmAnalysisGateway {
    llm: Arc<dyn LlmProvider>,
    config: GatewayConfig,
}

impl LlmAnalysisGateway {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GatewayConfig) -> Self {
        Self { llm, config }
    }

    /// Send one prompt and return the JSON object extracted from the reply.
    async fn complete_json(
        &self,
        call: AnalysisKind,
        system: &str,
        prompt: String,
        max_tokens: u32,
    ) -> Result<String, GatewayError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.0)
        .with_max_tokens(max_tokens);

        let response = match tokio::time::timeout(self.config.timeout, self.llm.complete(request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(call = %call, error = %e, "Analysis call failed");
                return Err(GatewayError::Unavailable {
                    call,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(call = %call, timeout = ?self.config.timeout, "Analysis call timed out");
                return Err(GatewayError::Timeout {
                    call,
                    after: self.config.timeout,
                });
            }
        };

        let (input_cost, output_cost) = self.llm.cost_per_token();
        let cost = input_cost * Decimal::from(response.input_tokens)
            + output_cost * Decimal::from(response.output_tokens);
        info!(
            call = %call,
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %cost.round_dp(6),
            "Analysis call completed"
        );

        Ok(extract_json_object(&response.content))
    }
}

#[async_trait]
impl AnalysisGateway for LlmAnalysisGateway {
    async fn infer_groups(
        &self,
        request: &GroupInferenceRequest,
    ) -> Result<GroupInference, GatewayError> {
        let call = AnalysisKind::GroupInference;
        let json = self
            .complete_json(
                call,
                GROUP_INFERENCE_SYSTEM,
                group_inference_prompt(request),
                self.config.inference_max_tokens,
            )
            .await?;
        parse_group_inference(&json)
            .map_err(|reason| contract_violation(call, reason, &json))
    }

    async fn synthesize_report(
        &self,
        request: &ReportRequest,
    ) -> Result<WellnessReport, GatewayError> {
        let call = AnalysisKind::ReportSynthesis;
        let json = self
            .complete_json(
                call,
                REPORT_SYSTEM,
                report_prompt(request),
                self.config.report_max_tokens,
            )
            .await?;
        parse_report(&json).map_err(|reason| contract_violation(call, reason, &json))
    }
}

fn contract_violation(call: AnalysisKind, reason: String, raw: &str) -> GatewayError {
    warn!(call = %call, reason = %reason, response = raw, "Analysis response violates contract");
    GatewayError::ContractViolation { call, reason }
}

/// Wire shape of the group-inference response.
#[derive(Debug, Deserialize)]
struct RawGroupInference {
    probable_groups: Vec<String>,
    reasoning: String,
}

impl TryFrom<RawGroupInference> for GroupInference {
    type Error = String;

    fn try_from(raw: RawGroupInference) -> Result<Self, Self::Error> {
        if raw.probable_groups.len() != PROBABLE_GROUP_COUNT {
            return Err(format!(
                "expected {PROBABLE_GROUP_COUNT} probable groups, got {}",
                raw.probable_groups.len()
            ));
        }

        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(PROBABLE_GROUP_COUNT);
        for id in &raw.probable_groups {
            let group: FocusGroup = id.parse()?;
            if !seen.insert(group) {
                return Err(format!("probable group {group} listed more than once"));
            }
            groups.push(group);
        }

        Self::new([groups[0], groups[1]], raw.reasoning)
    }
}

/// Parse and validate a group-inference response.
pub fn parse_group_inference(json: &str) -> Result<GroupInference, String> {
    let raw: RawGroupInference =
        serde_json::from_str(json).map_err(|e| format!("invalid group inference JSON: {e}"))?;
    raw.try_into()
}

/// Parse and validate a report-synthesis response.
pub fn parse_report(json: &str) -> Result<WellnessReport, String> {
    let report: WellnessReport =
        serde_json::from_str(json).map_err(|e| format!("invalid report JSON: {e}"))?;
    report.validate()?;
    Ok(report)
}

/// Extract a JSON object from model output that might contain markdown or prose.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
