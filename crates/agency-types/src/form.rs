//! Form builder types: forms, questions, branching logic and responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Publication state of a form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl std::fmt::Display for FormStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormStatus::Draft => write!(f, "draft"),
            FormStatus::Published => write!(f, "published"),
            FormStatus::Archived => write!(f, "archived"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSettings {
    #[serde(default)]
    pub thank_you_message: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub notify_on_submission: bool,
    /// Turn submissions carrying an email into leads
    #[serde(default = "default_true")]
    pub create_leads: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            thank_you_message: None,
            redirect_url: None,
            notify_on_submission: false,
            create_leads: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    pub agency_id: String,
    pub created_by: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: FormStatus,
    /// Public identifier, assigned on first publish
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub settings: FormSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    ShortText,
    LongText,
    Email,
    Phone,
    Number,
    SingleChoice,
    MultipleChoice,
    Dropdown,
    Rating,
    YesNo,
    Date,
}

impl QuestionType {
    /// Types whose answers must come from the option list
    pub fn has_options(&self) -> bool {
        matches!(
            self,
            QuestionType::SingleChoice | QuestionType::MultipleChoice | QuestionType::Dropdown
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionSettings {
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub max_rating: Option<u32>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    IsAnswered,
    IsNotAnswered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicAction {
    GoTo { question_id: String },
    EndForm,
}

/// Branching rule attached to a question, evaluated against its own answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicRule {
    pub condition: Condition,
    pub action: LogicAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRule {
    pub condition: Condition,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScoring {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub rules: Vec<ScoreRule>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub form_id: String,
    pub position: i32,
    pub question_type: QuestionType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub logic: Vec<LogicRule>,
    #[serde(default)]
    pub scoring: Option<QuestionScoring>,
    #[serde(default)]
    pub settings: QuestionSettings,
}

/// One submitted answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormResponse {
    pub id: String,
    pub form_id: String,
    pub agency_id: String,
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub respondent_email: Option<String>,
    #[serde(default)]
    pub lead_score: Option<u32>,
    #[serde(default)]
    pub lead_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Where a respondent goes after answering a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextStep {
    Question { question_id: String },
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormCreate {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Option<FormSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Option<FormSettings>,
    #[serde(default)]
    pub status: Option<FormStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionCreate {
    pub question_type: QuestionType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub logic: Vec<LogicRule>,
    #[serde(default)]
    pub scoring: Option<QuestionScoring>,
    #[serde(default)]
    pub settings: QuestionSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionUpdate {
    #[serde(default)]
    pub question_type: Option<QuestionType>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub options: Option<Vec<QuestionOption>>,
    #[serde(default)]
    pub logic: Option<Vec<LogicRule>>,
    #[serde(default)]
    pub scoring: Option<QuestionScoring>,
    #[serde(default)]
    pub settings: Option<QuestionSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOrder {
    pub question_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormWithQuestions {
    #[serde(flatten)]
    pub form: Form,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSubmission {
    pub answers: Vec<Answer>,
    #[serde(default)]
    pub respondent_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStepRequest {
    pub current_question_id: String,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

/// Result of a public submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub response_id: String,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub lead_score: Option<u32>,
    #[serde(default)]
    pub thank_you_message: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormAnalytics {
    pub form_id: String,
    pub total_responses: u64,
    pub responses_last_30_days: u64,
    pub average_score: Option<f64>,
    pub hot_leads: u64,
    pub warm_leads: u64,
    pub cold_leads: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_logic_rule_wire_format() {
        let rule: LogicRule = serde_json::from_value(json!({
            "condition": { "operator": "equals", "value": "yes" },
            "action": { "type": "go_to", "question_id": "q3" }
        }))
        .unwrap();
        assert_eq!(rule.condition.operator, ConditionOperator::Equals);
        assert_eq!(
            rule.action,
            LogicAction::GoTo {
                question_id: "q3".to_string()
            }
        );

        let end: LogicAction = serde_json::from_value(json!({ "type": "end_form" })).unwrap();
        assert_eq!(end, LogicAction::EndForm);
    }

    #[test]
    fn test_form_settings_default_creates_leads() {
        let settings: FormSettings = serde_json::from_value(json!({})).unwrap();
        assert!(settings.create_leads);
        assert!(!settings.notify_on_submission);
    }

    #[test]
    fn test_scoring_weight_defaults_to_one() {
        let scoring: QuestionScoring = serde_json::from_value(json!({})).unwrap();
        assert_eq!(scoring.weight, 1.0);
    }
}
