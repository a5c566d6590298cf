use crate::models::{
    DEFAULT_POINTS, FollowUpKind, FollowUpResponse, FollowUpSpec, Task, TaskDraft, TaskId,
};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_POINTS: i64 = 1000;
pub const MAX_RATING: u64 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task name must not be empty")]
    EmptyName,

    #[error("points must be between 1 and {MAX_POINTS}, got {0}")]
    PointsOutOfRange(i64),

    #[error("please complete all required fields: '{0}' is missing")]
    MissingRequired(String),

    #[error("no follow-up at index {0}")]
    UnknownFollowUp(usize),

    #[error("'{label}' expects {expected}")]
    WrongType { label: String, expected: &'static str },

    #[error("'{label}' has no option '{choice}'")]
    UnknownOption { label: String, choice: String },
}

/// Normalises user input into a catalog entry, keeping `id`.
pub fn build_task(draft: TaskDraft, id: TaskId) -> Result<Task, ValidationError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    let points = match draft.points {
        None => DEFAULT_POINTS,
        Some(points) if (1..=MAX_POINTS).contains(&points) => points as u32,
        Some(points) => return Err(ValidationError::PointsOutOfRange(points)),
    };

    let follow_ups = draft
        .follow_ups
        .into_iter()
        .filter_map(normalize_follow_up)
        .collect();

    Ok(Task {
        id,
        name: name.to_string(),
        points,
        follow_ups,
    })
}

// Follow-ups without a label are dropped on save.
fn normalize_follow_up(spec: FollowUpSpec) -> Option<FollowUpSpec> {
    let label = spec.label.trim();
    if label.is_empty() {
        return None;
    }

    let options = if spec.kind == FollowUpKind::Category {
        spec.options
            .iter()
            .map(|option| option.trim())
            .filter(|option| !option.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    Some(FollowUpSpec {
        kind: spec.kind,
        label: label.to_string(),
        required: spec.required,
        options,
    })
}

/// Turns raw answers keyed by follow-up index into typed responses.
///
/// Blank answers (missing, `null`, or an empty string) are left out unless the
/// follow-up is required.
pub fn validate_responses(
    task: &Task,
    raw: &BTreeMap<usize, Value>,
) -> Result<BTreeMap<usize, FollowUpResponse>, ValidationError> {
    if let Some(index) = raw.keys().find(|index| **index >= task.follow_ups.len()) {
        return Err(ValidationError::UnknownFollowUp(*index));
    }

    let mut responses = BTreeMap::new();
    for (index, spec) in task.follow_ups.iter().enumerate() {
        let answer = raw.get(&index).filter(|value| !is_blank(value));
        let Some(answer) = answer else {
            if spec.required {
                return Err(ValidationError::MissingRequired(spec.label.clone()));
            }
            continue;
        };

        responses.insert(index, parse_answer(spec, answer)?);
    }

    Ok(responses)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn parse_answer(spec: &FollowUpSpec, answer: &Value) -> Result<FollowUpResponse, ValidationError> {
    let wrong_type = |expected| ValidationError::WrongType {
        label: spec.label.clone(),
        expected,
    };

    match spec.kind {
        FollowUpKind::Text => answer
            .as_str()
            .map(|text| FollowUpResponse::Text(text.to_string()))
            .ok_or_else(|| wrong_type("text")),
        FollowUpKind::Rating => answer
            .as_u64()
            .filter(|rating| (1..=MAX_RATING).contains(rating))
            .map(|rating| FollowUpResponse::Rating(rating as u8))
            .ok_or_else(|| wrong_type("a rating from 1 to 5")),
        FollowUpKind::Category => {
            let choice = answer.as_str().ok_or_else(|| wrong_type("one of the options"))?;
            if spec.options.iter().any(|option| option == choice) {
                Ok(FollowUpResponse::Category(choice.to_string()))
            } else {
                Err(ValidationError::UnknownOption {
                    label: spec.label.clone(),
                    choice: choice.to_string(),
                })
            }
        }
    }
}
