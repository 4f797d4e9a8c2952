//! Prompt text for the two analysis calls.

use super::gateway::{GroupInferenceRequest, ReportRequest};
use super::model::FocusGroup;
use super::report::TRAJECTORY_STAGES;

/// Questions the open-ended answers respond to, in capture order.
pub const OPEN_ENDED_QUESTIONS: [&str; 4] = [
    "How have you been lately?",
    "Is there anything specific weighing on your mind?",
    "What kind of support are you hoping to find?",
    "Projective image response: what story or feelings come to mind when looking at an ambiguous image?",
];

pub const GROUP_INFERENCE_SYSTEM: &str = "\
You are a compassionate mental health intake assistant. You classify a participant \
into peer-support focus groups. Output only valid JSON.";

pub const REPORT_SYSTEM: &str = "\
You are a clinical intake system writing a therapy intake and handoff report. \
Be compassionate and clinically careful. Output only valid JSON.";

fn group_catalogue() -> String {
    FocusGroup::ALL
        .iter()
        .map(|g| {
            let focus = match g {
                FocusGroup::PostpartumDepression => {
                    "new parents experiencing emotional difficulties, feelings of inadequacy, bonding issues, or overwhelming stress related to parenthood"
                }
                FocusGroup::AnxietyManagement => {
                    "people experiencing racing thoughts, constant worry, restlessness, difficulty relaxing, or panic symptoms"
                }
                FocusGroup::WorkplaceStress => {
                    "people dealing with job burnout, work-life balance issues, workplace conflicts, or career-related anxiety"
                }
            };
            format!("- {}: for {focus}", g.as_str())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn demographics(age: Option<u32>, gender: Option<&str>) -> String {
    let age = age.map(|a| a.to_string()).unwrap_or_else(|| "not provided".into());
    let gender = gender.unwrap_or("not provided");
    format!("- Age: {age}\n- Gender: {gender}")
}

fn answered_questions(responses: &[String]) -> String {
    OPEN_ENDED_QUESTIONS
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let answer = responses
                .get(i)
                .map(String::as_str)
                .filter(|a| !a.trim().is_empty())
                .unwrap_or("Not provided");
            format!("{}. {q} - \"{answer}\"", i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the group-inference prompt.
pub fn group_inference_prompt(request: &GroupInferenceRequest) -> String {
    let ids = FocusGroup::ALL
        .iter()
        .map(|g| format!("\"{}\"", g.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Based on the participant's responses below, identify the TWO most probable focus groups.

Participant:
{demographics}

Responses:
{responses}

The image response is especially useful for surfacing underlying concerns. Look for:
- isolation, overwhelm or helplessness (possible depression)
- conflict, pressure or feeling trapped (possible workplace stress)
- worry, danger or uncertainty (possible anxiety)
- caregiving, babies or parental roles (possible postpartum concerns)

Available focus groups:
{catalogue}

Respond with a JSON object of exactly this shape:
{{
  \"probable_groups\": [two distinct values from {ids}, most likely first],
  \"reasoning\": \"brief explanation of the choice\"
}}",
        demographics = demographics(request.age, request.gender.as_deref()),
        responses = answered_questions(&request.responses),
        catalogue = group_catalogue(),
    )
}

/// Build the report-synthesis prompt.
pub fn report_prompt(request: &ReportRequest) -> String {
    let messages = request
        .user_messages
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. \"{m}\"", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let scores = request
        .psychometric_scores
        .iter()
        .map(|(g, s)| format!("- {g}: {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    let stages = TRAJECTORY_STAGES
        .iter()
        .enumerate()
        .map(|(i, s)| format!("   - Point {}: {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze this intake conversation and produce a wellness report with sentiment analysis.

Participant:
{demographics}
- Final focus group: {final_group}

Participant messages, in order:
{messages}

Open-ended responses:
{responses}

Psychometric scores (sum of 1-4 answers per group):
{scores}

Produce:
1. Sentiment analysis: dominant emotions, how the emotional tone progressed, key emotional phrases, a role classification from their communication style, your confidence (0-1), and an emotion with intensity (0-1) for each message.
2. A 4-5 line conversation summary covering engagement style, core themes and tone progression.
3. An emotion trajectory of exactly 5 points with positivity (0-100) and stability (0-100):
{stages}
4. Emotion Stability Index (esi, 0-100) and Therapeutic Readiness Index (tri, 0-100), each with an insight.
5. Behavioral Loop Strength (bls, 0-100) and Group Synergy Predictor (gsp, 0-100), each with an insight.
6. Risk assessment: riskLevel (\"low\", \"moderate\" or \"high\"), nature of risk, concerning phrases, transparency score (0-100).

Respond with a JSON object with these keys, all required:
{{
  \"sentimentAnalysis\": {{\"dominantEmotions\": [string], \"emotionalProgression\": string, \"keyPhrases\": [string], \"roleClassification\": string, \"confidenceLevel\": number, \"messageEmotions\": [{{\"message\": string, \"emotion\": string, \"intensity\": number}}]}},
  \"conversationSummary\": string,
  \"emotionTrajectory\": {{\"chartData\": [{{\"stage\": string, \"positivity\": number, \"stability\": number}}], \"esi\": number, \"esiInsight\": string, \"tri\": number, \"triInsight\": string}},
  \"behavioralSnapshot\": {{\"bls\": number, \"blsInsight\": string, \"gsp\": number, \"gspInsight\": string}},
  \"riskSummary\": {{\"riskLevel\": string, \"natureOfRisk\": string, \"alertPhrases\": [string], \"transparencyScore\": number}}
}}",
        demographics = demographics(request.age, request.gender.as_deref()),
        final_group = request.final_group,
        responses = answered_questions(&request.open_ended_responses),
    )
}
