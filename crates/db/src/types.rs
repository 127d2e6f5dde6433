use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, EnumString, Display,
    Default,
)]
#[serde(from = "String", into = "&'static str")]
pub enum TaskStatus {
    #[default]
    #[strum(serialize = "To Do")]
    ToDo,
    #[strum(serialize = "In Progress")]
    InProgress,
    #[strum(serialize = "Complete")]
    Complete,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::ToDo => "To Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Complete => "Complete",
        }
    }

    /// Case-insensitive parse that falls back to `ToDo` for blank or unknown input.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return TaskStatus::ToDo;
        }
        let compact: String = trimmed
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match compact.as_str() {
            "todo" => TaskStatus::ToDo,
            "inprogress" => TaskStatus::InProgress,
            "complete" | "completed" | "done" => TaskStatus::Complete,
            _ => TaskStatus::ToDo,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        TaskStatus::from_input(&value)
    }
}

impl From<TaskStatus> for &'static str {
    fn from(value: TaskStatus) -> Self {
        value.as_str()
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, EnumString, Display,
    Default,
)]
#[serde(from = "String", into = "&'static str")]
pub enum TaskPriority {
    #[default]
    #[strum(serialize = "default")]
    Default,
    #[strum(serialize = "Important")]
    Important,
    #[strum(serialize = "Moderately Important")]
    ModeratelyImportant,
    #[strum(serialize = "Not Important")]
    NotImportant,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Default => "default",
            TaskPriority::Important => "Important",
            TaskPriority::ModeratelyImportant => "Moderately Important",
            TaskPriority::NotImportant => "Not Important",
        }
    }

    /// Human-facing label; the stored `default` reads as "Default".
    pub fn label(&self) -> &'static str {
        match self {
            TaskPriority::Default => "Default",
            other => other.as_str(),
        }
    }

    /// Forum titles are prefixed with this glyph so the platform's prefix search can filter by it.
    pub fn glyph(&self) -> &'static str {
        match self {
            TaskPriority::Important => "🔴",
            TaskPriority::ModeratelyImportant => "🟠",
            TaskPriority::NotImportant | TaskPriority::Default => "⚪",
        }
    }

    /// Every distinct glyph a title may start with.
    pub fn glyphs() -> Vec<&'static str> {
        let mut glyphs: Vec<&'static str> = Vec::new();
        for glyph in TaskPriority::iter().map(|p| p.glyph()) {
            if !glyphs.contains(&glyph) {
                glyphs.push(glyph);
            }
        }
        glyphs
    }

    /// Accepts the stored names case-insensitively plus the shorthand aliases
    /// users type (critical, high, medium, low, normal). Unknown input maps to `Default`.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return TaskPriority::Default;
        }
        match trimmed.to_lowercase().as_str() {
            "critical" | "high" | "important" => TaskPriority::Important,
            "medium" | "moderately important" => TaskPriority::ModeratelyImportant,
            "low" | "not important" => TaskPriority::NotImportant,
            _ => TaskPriority::Default,
        }
    }
}

impl From<String> for TaskPriority {
    fn from(value: String) -> Self {
        TaskPriority::from_input(&value)
    }
}

impl From<TaskPriority> for &'static str {
    fn from(value: TaskPriority) -> Self {
        value.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!(TaskStatus::from_input("in progress"), TaskStatus::InProgress);
        assert_eq!(TaskStatus::from_input("In Progress"), TaskStatus::InProgress);
        assert_eq!(TaskStatus::from_input("COMPLETE"), TaskStatus::Complete);
        assert_eq!(TaskStatus::from_input("  "), TaskStatus::ToDo);
        assert_eq!(TaskStatus::from_input("blocked"), TaskStatus::ToDo);
    }

    #[test]
    fn status_serializes_as_display_string() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"In Progress\"");
        let parsed: TaskStatus = serde_json::from_str("\"To Do\"").unwrap();
        assert_eq!(parsed, TaskStatus::ToDo);
        assert_eq!(TaskStatus::Complete.to_string(), "Complete");
    }

    #[test]
    fn priority_aliases_map_to_canonical_values() {
        assert_eq!(TaskPriority::from_input("high"), TaskPriority::Important);
        assert_eq!(TaskPriority::from_input("Medium"), TaskPriority::ModeratelyImportant);
        assert_eq!(TaskPriority::from_input("low"), TaskPriority::NotImportant);
        assert_eq!(TaskPriority::from_input("normal"), TaskPriority::Default);
        assert_eq!(TaskPriority::from_input("not important"), TaskPriority::NotImportant);
        assert_eq!(TaskPriority::from_input("whatever"), TaskPriority::Default);
    }

    #[test]
    fn priority_glyphs_and_labels() {
        assert_eq!(TaskPriority::Important.glyph(), "🔴");
        assert_eq!(TaskPriority::ModeratelyImportant.glyph(), "🟠");
        assert_eq!(TaskPriority::Default.label(), "Default");
        assert_eq!(TaskPriority::NotImportant.label(), "Not Important");
        assert_eq!(TaskPriority::glyphs(), vec!["⚪", "🔴", "🟠"]);
    }
}
