//! Form branching interpreter
//!
//! Each question may carry ordered [`LogicRule`]s evaluated against its own
//! answer. The first matching rule decides where the respondent goes next;
//! without a match the form continues with the next question by position.

use crate::error::{AgencyError, Result};
use agency_types::{
    Answer, Condition, ConditionOperator, LogicAction, NextStep, Question, QuestionType,
};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

const DEFAULT_MAX_RATING: u32 = 5;
const SHORT_TEXT_LIMIT: usize = 500;
const LONG_TEXT_LIMIT: usize = 10_000;

/// Answers indexed by question id. Later duplicates win.
pub fn answer_map(answers: &[Answer]) -> HashMap<&str, &Value> {
    answers
        .iter()
        .map(|a| (a.question_id.as_str(), &a.value))
        .collect()
}

/// Non-null and non-empty
pub fn is_answered(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

pub(crate) fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

/// Comparable text form; booleans and their spellings collapse to yes/no
fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Bool(true) => return Some("yes".to_string()),
        Value::Bool(false) => return Some("no".to_string()),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(match text.as_str() {
        "true" => "yes".to_string(),
        "false" => "no".to_string(),
        _ => text,
    })
}

fn scalar_equals(answer: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(answer), as_number(expected)) {
        return (a - b).abs() < f64::EPSILON;
    }
    match (as_text(answer), as_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn matches_equals(answer: &Value, expected: &Value) -> bool {
    match answer {
        Value::Array(items) => items.iter().any(|item| scalar_equals(item, expected)),
        other => scalar_equals(other, expected),
    }
}

fn matches_contains(answer: &Value, expected: &Value) -> bool {
    match answer {
        Value::Array(items) => items.iter().any(|item| scalar_equals(item, expected)),
        other => match (as_text(other), as_text(expected)) {
            (Some(haystack), Some(needle)) => haystack.contains(&needle),
            _ => false,
        },
    }
}

/// Evaluate one condition against a (possibly missing) answer
pub fn evaluate(condition: &Condition, answer: Option<&Value>) -> bool {
    let answered = is_answered(answer);
    match condition.operator {
        ConditionOperator::IsAnswered => answered,
        ConditionOperator::IsNotAnswered => !answered,
        op => {
            let Some(answer) = answer.filter(|_| answered) else {
                return matches!(
                    op,
                    ConditionOperator::NotEquals | ConditionOperator::NotContains
                );
            };
            let expected = &condition.value;
            match op {
                ConditionOperator::Equals => matches_equals(answer, expected),
                ConditionOperator::NotEquals => !matches_equals(answer, expected),
                ConditionOperator::Contains => matches_contains(answer, expected),
                ConditionOperator::NotContains => !matches_contains(answer, expected),
                ConditionOperator::GreaterThan => match (as_number(answer), as_number(expected)) {
                    (Some(a), Some(b)) => a > b,
                    _ => false,
                },
                ConditionOperator::LessThan => match (as_number(answer), as_number(expected)) {
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                },
                ConditionOperator::IsAnswered | ConditionOperator::IsNotAnswered => {
                    unreachable!("handled above")
                }
            }
        }
    }
}

/// A form's questions in position order
pub struct FormLogic<'a> {
    questions: Vec<&'a Question>,
}

impl<'a> FormLogic<'a> {
    pub fn new(questions: &'a [Question]) -> Self {
        let mut questions: Vec<&Question> = questions.iter().collect();
        questions.sort_by_key(|q| q.position);
        Self { questions }
    }

    fn index_of(&self, question_id: &str) -> Option<usize> {
        self.questions.iter().position(|q| q.id == question_id)
    }

    pub fn first(&self) -> Option<&'a Question> {
        self.questions.first().copied()
    }

    /// Where to go after answering `current_id`
    pub fn next_step(&self, current_id: &str, answers: &HashMap<&str, &Value>) -> Result<NextStep> {
        let index = self
            .index_of(current_id)
            .ok_or_else(|| AgencyError::not_found("Question", current_id))?;
        let question = self.questions[index];
        let answer = answers.get(question.id.as_str()).copied();

        for rule in &question.logic {
            if !evaluate(&rule.condition, answer) {
                continue;
            }
            return match &rule.action {
                LogicAction::EndForm => Ok(NextStep::End),
                LogicAction::GoTo { question_id } => {
                    if self.index_of(question_id).is_none() {
                        return Err(AgencyError::not_found("Question", question_id));
                    }
                    Ok(NextStep::Question {
                        question_id: question_id.clone(),
                    })
                }
            };
        }

        Ok(match self.questions.get(index + 1) {
            Some(next) => NextStep::Question {
                question_id: next.id.clone(),
            },
            None => NextStep::End,
        })
    }

    /// Question ids the respondent actually sees, in order
    pub fn visible_path(&self, answers: &HashMap<&str, &Value>) -> Result<Vec<&'a Question>> {
        let Some(first) = self.first() else {
            return Ok(Vec::new());
        };

        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut current = first;
        loop {
            if !visited.insert(current.id.as_str()) {
                return Err(AgencyError::LogicCycle(current.id.clone()));
            }
            path.push(current);
            match self.next_step(&current.id, answers)? {
                NextStep::End => break,
                NextStep::Question { question_id } => {
                    let index = self
                        .index_of(&question_id)
                        .ok_or_else(|| AgencyError::not_found("Question", &question_id))?;
                    current = self.questions[index];
                }
            }
        }
        Ok(path)
    }

    /// Structural checks run before a form is published
    pub fn validate(&self) -> Result<()> {
        for question in &self.questions {
            if question.question_type.has_options() {
                if question.options.is_empty() {
                    return Err(AgencyError::Validation(format!(
                        "question '{}' needs at least one option",
                        question.title
                    )));
                }
                let mut seen = HashSet::new();
                for option in &question.options {
                    if !seen.insert(option.value.as_str()) {
                        return Err(AgencyError::Validation(format!(
                            "question '{}' repeats option value '{}'",
                            question.title, option.value
                        )));
                    }
                }
            }

            if let Some(max) = question.settings.max_rating {
                if !(1..=10).contains(&max) {
                    return Err(AgencyError::Validation(format!(
                        "question '{}' max rating must be between 1 and 10",
                        question.title
                    )));
                }
            }

            for rule in &question.logic {
                if matches!(
                    rule.condition.operator,
                    ConditionOperator::GreaterThan | ConditionOperator::LessThan
                ) && as_number(&rule.condition.value).is_none()
                {
                    return Err(AgencyError::Validation(format!(
                        "question '{}' compares against a non-numeric value",
                        question.title
                    )));
                }

                let LogicAction::GoTo { question_id } = &rule.action else {
                    continue;
                };
                if question_id == &question.id {
                    return Err(AgencyError::Validation(format!(
                        "question '{}' jumps to itself",
                        question.title
                    )));
                }
                let Some(target) = self.index_of(question_id).map(|i| self.questions[i]) else {
                    return Err(AgencyError::Validation(format!(
                        "question '{}' jumps to unknown question {}",
                        question.title, question_id
                    )));
                };
                // Forward-only jumps keep every path acyclic
                if target.position <= question.position {
                    return Err(AgencyError::Validation(format!(
                        "question '{}' jumps backwards to '{}'",
                        question.title, target.title
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check a submission and keep only answers on the visible path
    pub fn validate_answers(&self, answers: &[Answer]) -> Result<Vec<Answer>> {
        for answer in answers {
            if self.index_of(&answer.question_id).is_none() {
                return Err(AgencyError::Validation(format!(
                    "answer for unknown question {}",
                    answer.question_id
                )));
            }
        }

        let map = answer_map(answers);
        let mut accepted = Vec::new();
        for question in self.visible_path(&map)? {
            let value = map.get(question.id.as_str()).copied();
            if !is_answered(value) {
                if question.required {
                    return Err(AgencyError::Validation(format!(
                        "'{}' is required",
                        question.title
                    )));
                }
                continue;
            }
            if let Some(value) = value {
                validate_value(question, value)?;
                accepted.push(Answer {
                    question_id: question.id.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(accepted)
    }
}

fn invalid(question: &Question, reason: &str) -> AgencyError {
    AgencyError::Validation(format!("'{}' {}", question.title, reason))
}

fn option_exists(question: &Question, value: &Value) -> bool {
    match value {
        Value::String(s) => question.options.iter().any(|o| o.value == s.trim()),
        _ => false,
    }
}

/// Type check a single answer
pub fn validate_value(question: &Question, value: &Value) -> Result<()> {
    match question.question_type {
        QuestionType::ShortText | QuestionType::LongText => {
            let limit = if question.question_type == QuestionType::ShortText {
                SHORT_TEXT_LIMIT
            } else {
                LONG_TEXT_LIMIT
            };
            match value.as_str() {
                Some(s) if s.chars().count() <= limit => Ok(()),
                Some(_) => Err(invalid(question, &format!("exceeds {} characters", limit))),
                None => Err(invalid(question, "must be text")),
            }
        }
        QuestionType::Email => match value.as_str() {
            Some(s) if EMAIL_RE.is_match(s.trim()) => Ok(()),
            _ => Err(invalid(question, "must be a valid email address")),
        },
        QuestionType::Phone => {
            let Some(s) = value.as_str() else {
                return Err(invalid(question, "must be a phone number"));
            };
            let allowed = s
                .chars()
                .all(|c| c.is_ascii_digit() || "+-(). ".contains(c));
            let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
            if allowed && digits >= 7 {
                Ok(())
            } else {
                Err(invalid(question, "must be a phone number"))
            }
        }
        QuestionType::Number => {
            let Some(n) = as_number(value) else {
                return Err(invalid(question, "must be a number"));
            };
            if let Some(min) = question.settings.min {
                if n < min {
                    return Err(invalid(question, &format!("must be at least {}", min)));
                }
            }
            if let Some(max) = question.settings.max {
                if n > max {
                    return Err(invalid(question, &format!("must be at most {}", max)));
                }
            }
            Ok(())
        }
        QuestionType::SingleChoice | QuestionType::Dropdown => {
            if option_exists(question, value) {
                Ok(())
            } else {
                Err(invalid(question, "must be one of the listed options"))
            }
        }
        QuestionType::MultipleChoice => match value {
            Value::Array(items) if items.iter().all(|item| option_exists(question, item)) => {
                let mut seen = HashSet::new();
                if items
                    .iter()
                    .filter_map(Value::as_str)
                    .all(|item| seen.insert(item.trim()))
                {
                    Ok(())
                } else {
                    Err(invalid(question, "must not select an option twice"))
                }
            }
            _ => Err(invalid(question, "must be a list of the listed options")),
        },
        QuestionType::Rating => {
            let max = question.settings.max_rating.unwrap_or(DEFAULT_MAX_RATING);
            match as_number(value) {
                Some(n) if n.fract() == 0.0 && n >= 1.0 && n <= f64::from(max) => Ok(()),
                _ => Err(invalid(
                    question,
                    &format!("must be a whole rating from 1 to {}", max),
                )),
            }
        }
        QuestionType::YesNo => match as_text(value).as_deref() {
            Some("yes") | Some("no") => Ok(()),
            _ => Err(invalid(question, "must be yes or no")),
        },
        QuestionType::Date => match value.as_str() {
            Some(s) if NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok() => Ok(()),
            _ => Err(invalid(question, "must be a date (YYYY-MM-DD)")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_types::{LogicRule, QuestionOption, QuestionSettings};
    use serde_json::json;

    fn question(id: &str, position: i32, question_type: QuestionType) -> Question {
        Question {
            id: id.to_string(),
            form_id: "form".to_string(),
            position,
            question_type,
            title: id.to_uppercase(),
            description: None,
            required: false,
            options: Vec::new(),
            logic: Vec::new(),
            scoring: None,
            settings: QuestionSettings::default(),
        }
    }

    fn option(value: &str) -> QuestionOption {
        QuestionOption {
            label: value.to_string(),
            value: value.to_string(),
            score: 0.0,
        }
    }

    fn rule(operator: ConditionOperator, value: Value, action: LogicAction) -> LogicRule {
        LogicRule {
            condition: Condition { operator, value },
            action,
        }
    }

    fn goto(id: &str) -> LogicAction {
        LogicAction::GoTo {
            question_id: id.to_string(),
        }
    }

    fn answer(id: &str, value: Value) -> Answer {
        Answer {
            question_id: id.to_string(),
            value,
        }
    }

    /// q1 (budget yes/no) -> "no" ends the form, q2 skipped when size < 10
    fn branching_form() -> Vec<Question> {
        let mut q1 = question("q1", 1, QuestionType::YesNo);
        q1.required = true;
        q1.logic = vec![rule(ConditionOperator::Equals, json!("no"), LogicAction::EndForm)];

        let mut q2 = question("q2", 2, QuestionType::Number);
        q2.logic = vec![rule(ConditionOperator::LessThan, json!(10), goto("q4"))];

        let q3 = question("q3", 3, QuestionType::ShortText);
        let mut q4 = question("q4", 4, QuestionType::Email);
        q4.required = true;
        vec![q4, q2, q1, q3]
    }

    #[test]
    fn test_evaluate_operators() {
        let cond = |operator, value| Condition { operator, value };

        assert!(evaluate(&cond(ConditionOperator::Equals, json!("Yes")), Some(&json!(true))));
        assert!(evaluate(&cond(ConditionOperator::Equals, json!(5)), Some(&json!("5"))));
        assert!(evaluate(
            &cond(ConditionOperator::Contains, json!("seo")),
            Some(&json!(["ads", "seo"]))
        ));
        assert!(evaluate(
            &cond(ConditionOperator::Contains, json!("GROWTH")),
            Some(&json!("we want growth fast"))
        ));
        assert!(evaluate(&cond(ConditionOperator::GreaterThan, json!(100)), Some(&json!(250))));
        assert!(!evaluate(&cond(ConditionOperator::GreaterThan, json!(100)), Some(&json!("lots"))));
        assert!(evaluate(&cond(ConditionOperator::IsNotAnswered, Value::Null), Some(&json!("  "))));
        assert!(evaluate(&cond(ConditionOperator::NotEquals, json!("x")), None));
        assert!(!evaluate(&cond(ConditionOperator::Equals, json!("x")), None));
    }

    #[test]
    fn test_next_step_follows_rules_then_position() {
        let questions = branching_form();
        let logic = FormLogic::new(&questions);

        let answers = vec![answer("q1", json!("no"))];
        assert_eq!(logic.next_step("q1", &answer_map(&answers)).unwrap(), NextStep::End);

        let answers = vec![answer("q1", json!("yes")), answer("q2", json!(3))];
        let map = answer_map(&answers);
        assert_eq!(
            logic.next_step("q1", &map).unwrap(),
            NextStep::Question {
                question_id: "q2".to_string()
            }
        );
        assert_eq!(
            logic.next_step("q2", &map).unwrap(),
            NextStep::Question {
                question_id: "q4".to_string()
            }
        );
        assert_eq!(logic.next_step("q4", &map).unwrap(), NextStep::End);
        assert!(logic.next_step("missing", &map).is_err());
    }

    #[test]
    fn test_visible_path_skips_branches() {
        let questions = branching_form();
        let logic = FormLogic::new(&questions);

        let answers = vec![answer("q1", json!(true)), answer("q2", json!(50))];
        let path: Vec<&str> = logic
            .visible_path(&answer_map(&answers))
            .unwrap()
            .iter()
            .map(|q| q.id.as_str())
            .collect();
        assert_eq!(path, vec!["q1", "q2", "q3", "q4"]);

        let answers = vec![answer("q1", json!(true)), answer("q2", json!(2))];
        let path: Vec<&str> = logic
            .visible_path(&answer_map(&answers))
            .unwrap()
            .iter()
            .map(|q| q.id.as_str())
            .collect();
        assert_eq!(path, vec!["q1", "q2", "q4"]);
    }

    #[test]
    fn test_visible_path_detects_cycle() {
        let mut q1 = question("q1", 1, QuestionType::ShortText);
        q1.logic = vec![rule(ConditionOperator::IsAnswered, Value::Null, goto("q2"))];
        let mut q2 = question("q2", 2, QuestionType::ShortText);
        q2.logic = vec![rule(ConditionOperator::IsNotAnswered, Value::Null, goto("q1"))];
        let questions = vec![q1, q2];
        let logic = FormLogic::new(&questions);

        let answers = vec![answer("q1", json!("hi"))];
        let err = logic.visible_path(&answer_map(&answers)).unwrap_err();
        assert_eq!(err, AgencyError::LogicCycle("q1".to_string()));
        assert!(logic.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_structure() {
        let mut q1 = question("q1", 1, QuestionType::SingleChoice);
        q1.options = vec![option("a"), option("a")];
        let questions = vec![q1];
        assert!(FormLogic::new(&questions).validate().is_err());

        let mut q1 = question("q1", 1, QuestionType::ShortText);
        q1.logic = vec![rule(ConditionOperator::Equals, json!("x"), goto("nope"))];
        let questions = vec![q1];
        assert!(FormLogic::new(&questions).validate().is_err());

        let questions = branching_form();
        assert!(FormLogic::new(&questions).validate().is_ok());
    }

    #[test]
    fn test_validate_answers_prunes_hidden_answers() {
        let questions = branching_form();
        let logic = FormLogic::new(&questions);

        // q3 is hidden by the q2 jump, so its answer is dropped
        let answers = vec![
            answer("q1", json!("yes")),
            answer("q2", json!(4)),
            answer("q3", json!("hidden")),
            answer("q4", json!("lead@example.com")),
        ];
        let accepted = logic.validate_answers(&answers).unwrap();
        let ids: Vec<&str> = accepted.iter().map(|a| a.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q4"]);
    }

    #[test]
    fn test_validate_answers_enforces_required_on_path_only() {
        let questions = branching_form();
        let logic = FormLogic::new(&questions);

        // Ending early means q4 is never shown, so it is not required
        let answers = vec![answer("q1", json!("no"))];
        assert_eq!(logic.validate_answers(&answers).unwrap().len(), 1);

        let answers = vec![answer("q1", json!("yes"))];
        let err = logic.validate_answers(&answers).unwrap_err();
        assert!(matches!(err, AgencyError::Validation(msg) if msg.contains("Q4")));
    }

    #[test]
    fn test_validate_value_types() {
        let email = question("e", 1, QuestionType::Email);
        assert!(validate_value(&email, &json!("a@b.co")).is_ok());
        assert!(validate_value(&email, &json!("not-an-email")).is_err());

        let phone = question("p", 1, QuestionType::Phone);
        assert!(validate_value(&phone, &json!("+1 (555) 010-9999")).is_ok());
        assert!(validate_value(&phone, &json!("12ab")).is_err());

        let mut rating = question("r", 1, QuestionType::Rating);
        rating.settings.max_rating = Some(10);
        assert!(validate_value(&rating, &json!(10)).is_ok());
        assert!(validate_value(&rating, &json!(11)).is_err());
        assert!(validate_value(&rating, &json!(2.5)).is_err());

        let mut multi = question("m", 1, QuestionType::MultipleChoice);
        multi.options = vec![option("seo"), option("ads")];
        assert!(validate_value(&multi, &json!(["seo", "ads"])).is_ok());
        assert!(validate_value(&multi, &json!(["tv"])).is_err());
        assert!(validate_value(&multi, &json!(["seo", "seo"])).is_err());
        assert!(validate_value(&multi, &json!(["seo", " seo"])).is_err());

        let date = question("d", 1, QuestionType::Date);
        assert!(validate_value(&date, &json!("2024-02-29")).is_ok());
        assert!(validate_value(&date, &json!("2023-02-29")).is_err());

        let mut number = question("n", 1, QuestionType::Number);
        number.settings.min = Some(0.0);
        assert!(validate_value(&number, &json!("-1")).is_err());
        assert!(validate_value(&number, &json!("12.5")).is_ok());

        number.settings.max = Some(100.0);
        number.required = true;
        for bad in ["NaN", "nan", "inf", "-infinity"] {
            assert!(validate_value(&number, &json!(bad)).is_err(), "{} accepted", bad);
        }
    }
}
