//! Stable numbering for the subtasks embedded in a task.
//!
//! Subtask ids are positive integers unique within their parent task. They are
//! assigned once and never renumbered, so a reference such as `#3` keeps
//! pointing at the same item for as long as the task exists. Gaps are normal.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Largest id a subtask may carry. Stored ids above it are renumbered on load.
pub const MAX_SUBTASK_ID: u32 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubtaskError {
    #[error("Sub-task #{0} not found")]
    NotFound(u32),
    #[error("Invalid sub-task: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub completed: bool,
}

/// A subtask as found in stored or user-supplied data, before it has a trusted id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubtaskDraft {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub completed: bool,
}

impl From<Subtask> for SubtaskDraft {
    fn from(subtask: Subtask) -> Self {
        Self {
            id: Some(i64::from(subtask.id)),
            name: subtask.name,
            description: subtask.description,
            url: subtask.url,
            completed: subtask.completed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtaskFields {
    pub name: String,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => parse_subtask_id(&s).ok().map(i64::from),
        _ => None,
    })
}

fn valid_id(raw: Option<i64>) -> Option<u32> {
    raw.and_then(|id| u32::try_from(id).ok())
        .filter(|id| (1..=MAX_SUBTASK_ID).contains(id))
}

/// Canonicalise a raw subtask list.
///
/// Valid, first-seen ids are kept as they are. Entries with a missing, invalid or
/// colliding id receive the lowest integer (from 1) not used anywhere in the list.
/// The result is sorted by id, and normalising it again returns it unchanged.
pub fn normalize(raw: Vec<SubtaskDraft>) -> Vec<Subtask> {
    let mut claimed = HashSet::new();
    let mut kept = Vec::with_capacity(raw.len());
    for draft in &raw {
        kept.push(valid_id(draft.id).filter(|id| claimed.insert(*id)));
    }

    let mut next_free = 1u32;
    let mut normalized = Vec::with_capacity(raw.len());
    for (draft, kept_id) in raw.into_iter().zip(kept) {
        let id = match kept_id {
            Some(id) => id,
            None => {
                while claimed.contains(&next_free) {
                    next_free += 1;
                }
                claimed.insert(next_free);
                next_free
            }
        };
        normalized.push(Subtask {
            id,
            name: draft.name,
            description: draft.description,
            url: draft.url,
            completed: draft.completed,
        });
    }

    normalized.sort_by_key(|subtask| subtask.id);
    normalized
}

/// Re-run normalisation over an already typed list.
pub fn renormalize(list: Vec<Subtask>) -> Vec<Subtask> {
    normalize(list.into_iter().map(SubtaskDraft::from).collect())
}

pub(crate) fn deserialize_subtasks<'de, D>(deserializer: D) -> Result<Vec<Subtask>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<SubtaskDraft>>::deserialize(deserializer)?;
    Ok(normalize(raw.unwrap_or_default()))
}

/// Lowest id an automatically added subtask may take: above every id present and
/// at or above the task's high-water mark, so deleted ids are never handed out again.
pub fn next_id(list: &[Subtask], high_water: u32) -> u32 {
    let above_existing = list
        .iter()
        .map(|s| s.id)
        .max()
        .map_or(1, |max| max.saturating_add(1));
    above_existing.max(high_water).max(1)
}

/// Append a subtask with a fresh id and return that id.
pub fn add(list: &mut Vec<Subtask>, fields: SubtaskFields, high_water: u32) -> Result<u32, SubtaskError> {
    validate_fields(&fields)?;
    let id = next_id(list, high_water);
    if id > MAX_SUBTASK_ID {
        return Err(SubtaskError::Validation(format!(
            "Sub-task ids are exhausted (limit #{MAX_SUBTASK_ID})"
        )));
    }
    list.push(Subtask {
        id,
        name: fields.name.trim().to_string(),
        description: fields.description.trim().to_string(),
        url: fields.url.trim().to_string(),
        completed: false,
    });
    list.sort_by_key(|subtask| subtask.id);
    Ok(id)
}

/// Edit subtask `id` in place, or create it under exactly that id.
pub fn upsert(
    list: &mut Vec<Subtask>,
    id: u32,
    fields: SubtaskFields,
) -> Result<UpsertOutcome, SubtaskError> {
    if id == 0 {
        return Err(SubtaskError::Validation(
            "Sub-task ids start at 1".to_string(),
        ));
    }
    if id > MAX_SUBTASK_ID {
        return Err(SubtaskError::Validation(format!(
            "Sub-task ids stop at #{MAX_SUBTASK_ID}"
        )));
    }
    validate_fields(&fields)?;

    if let Some(existing) = list.iter_mut().find(|s| s.id == id) {
        existing.name = fields.name.trim().to_string();
        existing.description = fields.description.trim().to_string();
        existing.url = fields.url.trim().to_string();
        return Ok(UpsertOutcome::Updated);
    }

    list.push(Subtask {
        id,
        name: fields.name.trim().to_string(),
        description: fields.description.trim().to_string(),
        url: fields.url.trim().to_string(),
        completed: false,
    });
    list.sort_by_key(|subtask| subtask.id);
    Ok(UpsertOutcome::Created)
}

/// Flip completion of subtask `id`, returning the new state.
pub fn toggle(list: &mut [Subtask], id: u32) -> Result<bool, SubtaskError> {
    let subtask = list
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or(SubtaskError::NotFound(id))?;
    subtask.completed = !subtask.completed;
    Ok(subtask.completed)
}

pub fn delete(list: &mut Vec<Subtask>, id: u32) -> Result<Subtask, SubtaskError> {
    let position = list
        .iter()
        .position(|s| s.id == id)
        .ok_or(SubtaskError::NotFound(id))?;
    Ok(list.remove(position))
}

/// Parse a user-typed subtask reference such as `3` or `#3`.
pub fn parse_subtask_id(input: &str) -> Result<u32, SubtaskError> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed).trim();
    match digits.parse::<u32>() {
        Ok(id) if (1..=MAX_SUBTASK_ID).contains(&id) => Ok(id),
        _ => Err(SubtaskError::Validation(format!(
            "'{trimmed}' is not a sub-task number"
        ))),
    }
}

fn validate_fields(fields: &SubtaskFields) -> Result<(), SubtaskError> {
    if fields.name.trim().is_empty() {
        return Err(SubtaskError::Validation(
            "Sub-task name is required".to_string(),
        ));
    }
    let url = fields.url.trim();
    if !url.is_empty() && !crate::validation::is_valid_url(url) {
        return Err(SubtaskError::Validation(format!(
            "'{url}' is not a valid http(s) URL"
        )));
    }
    Ok(())
}
