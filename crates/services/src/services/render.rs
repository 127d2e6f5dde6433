//! Text shown on a task's forum thread.

use db::{TaskPriority, models::task::Task};

/// Platform limits; text is cut here so what we compare against is what the platform stores.
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_BODY_CHARS: usize = 2000;

const PROGRESS_BAR_WIDTH: usize = 10;
const FILLED: char = '█';
const EMPTY: char = '░';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedThread {
    pub title: String,
    pub body: String,
}

pub fn render(task: &Task) -> RenderedThread {
    RenderedThread {
        title: thread_title(task),
        body: thread_body(task),
    }
}

/// Priority glyph, a space, then the task name.
pub fn thread_title(task: &Task) -> String {
    truncate_chars(format!("{} {}", task.priority.glyph(), task.name), MAX_TITLE_CHARS)
}

pub fn thread_body(task: &Task) -> String {
    let mut lines = vec![
        format!("**Status:** {}", task.status),
        format!(
            "**Priority:** {} {}",
            task.priority.glyph(),
            task.priority.label()
        ),
        format!("**Owner:** {}", non_empty_or(&task.owner, "Unassigned")),
        format!(
            "**Deadline:** {}",
            task.deadline_display().as_deref().unwrap_or("None")
        ),
        String::new(),
        format!(
            "**Description:** {}",
            non_empty_or(&task.description, "*No description*")
        ),
    ];
    if !task.url.trim().is_empty() {
        lines.push(format!("**URL:** {}", task.url.trim()));
    }

    if let Some((completed, total)) = task.subtask_progress() {
        lines.push(String::new());
        lines.push(format!("**Progress:** {}", progress_bar(completed, total)));
        lines.push(String::new());
        lines.push("**Sub-tasks:**".to_string());
        for subtask in &task.subtasks {
            let checkbox = if subtask.completed { "✅" } else { "☐" };
            lines.push(format!("{checkbox} {}. {}", subtask.id, subtask.name));
            if !subtask.description.trim().is_empty() {
                lines.push(format!("   📝 {}", subtask.description.trim()));
            }
            if !subtask.url.trim().is_empty() {
                lines.push(format!("   🔗 {}", subtask.url.trim()));
            }
        }
    }

    truncate_chars(lines.join("\n"), MAX_BODY_CHARS)
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
    }
    text
}

/// `"███░░░░░░░ 30% (3/10)"`. Callers skip it when `total` is zero.
pub fn progress_bar(completed: usize, total: usize) -> String {
    let total = total.max(1);
    let completed = completed.min(total);
    let filled = completed * PROGRESS_BAR_WIDTH / total;
    let percent = completed * 100 / total;
    let bar: String = std::iter::repeat_n(FILLED, filled)
        .chain(std::iter::repeat_n(EMPTY, PROGRESS_BAR_WIDTH - filled))
        .collect();
    format!("{bar} {percent}% ({completed}/{total})")
}

/// Remove a leading priority glyph (and the space after it) from a thread title.
pub fn strip_priority_glyph(title: &str) -> &str {
    for glyph in TaskPriority::glyphs() {
        if let Some(rest) = title.strip_prefix(glyph)
            && let Some(rest) = rest.strip_prefix(' ')
        {
            return rest;
        }
    }
    title
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { fallback } else { trimmed }
}
