//! Lead scoring from weighted answers

use crate::logic::{answer_map, as_number, evaluate, is_answered};
use agency_types::{Answer, LeadQualification, Question, QuestionType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_MAX_RATING: u32 = 5;

/// Minimum normalized score for each qualification band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringThresholds {
    pub hot: u32,
    pub warm: u32,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self { hot: 70, warm: 40 }
    }
}

impl ScoringThresholds {
    pub fn qualify(&self, score: u32) -> LeadQualification {
        if score >= self.hot {
            LeadQualification::Hot
        } else if score >= self.warm {
            LeadQualification::Warm
        } else {
            LeadQualification::Cold
        }
    }
}

/// Points earned by one scored question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreContribution {
    pub question_id: String,
    pub points: f64,
    pub max_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadScore {
    /// Normalized 0..=100
    pub score: u32,
    pub raw: f64,
    pub max: f64,
    pub qualification: LeadQualification,
    pub breakdown: Vec<ScoreContribution>,
}

#[derive(Debug, Clone, Default)]
pub struct LeadScorer {
    thresholds: ScoringThresholds,
}

impl LeadScorer {
    pub fn new(thresholds: ScoringThresholds) -> Self {
        Self { thresholds }
    }

    pub fn score(&self, questions: &[Question], answers: &[Answer]) -> LeadScore {
        let answers = answer_map(answers);
        let mut raw = 0.0;
        let mut max = 0.0;
        let mut breakdown = Vec::new();

        for question in questions {
            let Some(scoring) = &question.scoring else {
                continue;
            };
            let answer = answers.get(question.id.as_str()).copied();
            let (points, max_points) = question_points(question, answer);
            let weight = scoring.weight.max(0.0);

            raw += points * weight;
            max += max_points * weight;
            breakdown.push(ScoreContribution {
                question_id: question.id.clone(),
                points: points * weight,
                max_points: max_points * weight,
            });
        }

        let score = if max > 0.0 {
            ((raw / max) * 100.0).round().clamp(0.0, 100.0) as u32
        } else {
            0
        };

        LeadScore {
            score,
            raw,
            max,
            qualification: self.thresholds.qualify(score),
            breakdown,
        }
    }
}

fn option_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_lowercase()),
        Value::Bool(true) => Some("yes".to_string()),
        Value::Bool(false) => Some("no".to_string()),
        _ => None,
    }
}

fn option_matches(option_value: &str, value: &Value) -> bool {
    option_text(value).is_some_and(|text| option_value.to_lowercase() == text)
}

fn selected_option_score(question: &Question, value: &Value) -> Option<f64> {
    question
        .options
        .iter()
        .find(|o| option_matches(&o.value, value))
        .map(|o| o.score)
}

fn rule_points(question: &Question, answer: Option<&Value>) -> (f64, f64) {
    let Some(scoring) = &question.scoring else {
        return (0.0, 0.0);
    };
    let max = scoring
        .rules
        .iter()
        .map(|r| r.points)
        .fold(0.0_f64, f64::max);
    let points = scoring
        .rules
        .iter()
        .find(|r| evaluate(&r.condition, answer))
        .map(|r| r.points)
        .unwrap_or(0.0);
    (points, max)
}

/// (points, max points) before weighting
fn question_points(question: &Question, answer: Option<&Value>) -> (f64, f64) {
    let has_rules = question
        .scoring
        .as_ref()
        .map(|s| !s.rules.is_empty())
        .unwrap_or(false);
    if has_rules {
        return rule_points(question, answer);
    }

    let answered = is_answered(answer);
    match question.question_type {
        QuestionType::SingleChoice | QuestionType::Dropdown | QuestionType::YesNo => {
            let max = question
                .options
                .iter()
                .map(|o| o.score)
                .fold(0.0_f64, f64::max);
            let points = answer
                .filter(|_| answered)
                .and_then(|v| selected_option_score(question, v))
                .unwrap_or(0.0);
            (points, max)
        }
        QuestionType::MultipleChoice => {
            let max: f64 = question
                .options
                .iter()
                .map(|o| o.score)
                .filter(|s| *s > 0.0)
                .sum();
            // Each option counts once however often it is repeated
            let points = match answer {
                Some(Value::Array(items)) => question
                    .options
                    .iter()
                    .filter(|o| {
                        items
                            .iter()
                            .any(|item| option_matches(&o.value, item))
                    })
                    .map(|o| o.score)
                    .sum(),
                _ => 0.0,
            };
            (points, max)
        }
        QuestionType::Rating => {
            let max = f64::from(question.settings.max_rating.unwrap_or(DEFAULT_MAX_RATING));
            let points = answer
                .and_then(as_number)
                .unwrap_or(0.0)
                .clamp(0.0, max);
            (points, max)
        }
        _ => rule_points(question, answer),
    }
}
