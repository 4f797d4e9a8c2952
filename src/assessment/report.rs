//! Wellness report produced by the report-synthesis call.
//!
//! Field names follow the gateway's camelCase wire schema. Required fields
//! carry no serde defaults: a missing field fails deserialization.

use serde::{Deserialize, Serialize};

/// Number of points on the emotion trajectory chart.
pub const TRAJECTORY_POINTS: usize = 5;

/// Labels of the trajectory points, in order.
pub const TRAJECTORY_STAGES: [&str; TRAJECTORY_POINTS] = [
    "Initial contact",
    "Sharing feelings",
    "Deep sharing",
    "Image response",
    "Assessment completion",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellnessReport {
    pub sentiment_analysis: SentimentAnalysis,
    pub conversation_summary: String,
    pub emotion_trajectory: EmotionTrajectory,
    pub behavioral_snapshot: BehavioralSnapshot,
    pub risk_summary: RiskSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentAnalysis {
    pub dominant_emotions: Vec<String>,
    pub emotional_progression: String,
    pub key_phrases: Vec<String>,
    pub role_classification: String,
    pub confidence_level: f64,
    pub message_emotions: Vec<MessageEmotion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEmotion {
    pub message: String,
    pub emotion: String,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionTrajectory {
    pub chart_data: Vec<ChartPoint>,
    /// Emotion Stability Index.
    pub esi: f64,
    pub esi_insight: String,
    /// Therapeutic Readiness Index.
    pub tri: f64,
    pub tri_insight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub stage: String,
    pub positivity: f64,
    pub stability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehavioralSnapshot {
    /// Behavioral Loop Strength.
    pub bls: f64,
    pub bls_insight: String,
    /// Group Synergy Predictor.
    pub gsp: f64,
    pub gsp_insight: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[serde(alias = "Low", alias = "LOW")]
    Low,
    #[serde(alias = "Moderate", alias = "MODERATE")]
    Moderate,
    #[serde(alias = "High", alias = "HIGH")]
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub risk_level: RiskLevel,
    pub nature_of_risk: String,
    pub alert_phrases: Vec<String>,
    pub transparency_score: f64,
}

/// A named 0–100 index with its insight text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NamedIndex<'a> {
    pub name: &'static str,
    pub value: f64,
    pub insight: &'a str,
}

fn check_scale(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(format!("{name} must be within 0-100, got {value}"));
    }
    Ok(())
}

impl WellnessReport {
    /// Check value ranges and cardinalities the schema alone cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let points = &self.emotion_trajectory.chart_data;
        if points.len() != TRAJECTORY_POINTS {
            return Err(format!(
                "emotionTrajectory.chartData must have {TRAJECTORY_POINTS} points, got {}",
                points.len()
            ));
        }
        for (i, point) in points.iter().enumerate() {
            check_scale(&format!("chartData[{i}].positivity"), point.positivity)?;
            check_scale(&format!("chartData[{i}].stability"), point.stability)?;
        }
        for index in self.indices() {
            check_scale(index.name, index.value)?;
        }
        check_scale("riskSummary.transparencyScore", self.risk_summary.transparency_score)?;
        if !self.sentiment_analysis.confidence_level.is_finite()
            || self.sentiment_analysis.confidence_level < 0.0
        {
            return Err(format!(
                "sentimentAnalysis.confidenceLevel must be a non-negative number, got {}",
                self.sentiment_analysis.confidence_level
            ));
        }
        Ok(())
    }

    /// The four scalar indices, in display order.
    pub fn indices(&self) -> [NamedIndex<'_>; 4] {
        let t = &self.emotion_trajectory;
        let b = &self.behavioral_snapshot;
        [
            NamedIndex {
                name: "Emotion Stability Index",
                value: t.esi,
                insight: &t.esi_insight,
            },
            NamedIndex {
                name: "Therapeutic Readiness Index",
                value: t.tri,
                insight: &t.tri_insight,
            },
            NamedIndex {
                name: "Behavioral Loop Strength",
                value: b.bls,
                insight: &b.bls_insight,
            },
            NamedIndex {
                name: "Group Synergy Predictor",
                value: b.gsp,
                insight: &b.gsp_insight,
            },
        ]
    }
}
