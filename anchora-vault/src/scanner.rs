//! Scanning vault text for anchored tasks
//!
//! A task line is a checkbox list item carrying an anchor token. Indented
//! lines that follow belong to the task until indentation returns to the
//! task's level: checkbox lines become subtasks, anything else becomes notes.

use std::iter::{Enumerate, Peekable};
use std::str::Lines;

use chrono::NaiveDate;
use tracing::warn;

use crate::task::{Priority, Subtask, TrackedTask, ANCHOR_PREFIX};

/// Scan text for tracked tasks.
///
/// The returned iterator is lazy and holds no state between calls;
/// scanning the same text twice yields the same tasks.
pub fn scan_tasks(text: &str) -> TaskScan<'_> {
    TaskScan {
        lines: text.lines().enumerate().peekable(),
    }
}

/// Lazy iterator over the tracked tasks in a piece of text
pub struct TaskScan<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
}

impl<'a> Iterator for TaskScan<'a> {
    type Item = TrackedTask;

    fn next(&mut self) -> Option<TrackedTask> {
        while let Some((line_no, line)) = self.lines.next() {
            let indent = leading_ws(line);
            let Some((completed, rest)) = parse_checkbox(line.trim_start()) else {
                continue;
            };
            let Some((anchor_id, head)) = split_anchor(rest) else {
                continue;
            };

            if head.title.is_empty() {
                warn!(line = line_no + 1, anchor = %anchor_id, "skipping anchored task with no title");
                continue;
            }

            let mut task = TrackedTask {
                anchor_id,
                title: head.title,
                completed,
                priority: head.priority,
                due_date: head.due_date,
                subtasks: Vec::new(),
                notes: Vec::new(),
                line_no,
            };

            // Consume the indented block belonging to this task.
            while let Some(&(_, next_line)) = self.lines.peek() {
                if next_line.trim().is_empty() || leading_ws(next_line) <= indent {
                    break;
                }
                let (_, body_line) = self.lines.next().expect("peeked line present");
                let trimmed = body_line.trim_start();
                match parse_checkbox(trimmed) {
                    Some((sub_done, sub_text)) => task.subtasks.push(Subtask {
                        text: normalize_ws(sub_text),
                        completed: sub_done,
                    }),
                    None => task.notes.push(trimmed.trim_end().to_string()),
                }
            }

            return Some(task);
        }
        None
    }
}

/// Count of leading whitespace characters (spaces and tabs)
pub(crate) fn leading_ws(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

/// Parse a `- [ ]` / `- [x]` checkbox item; returns completion and the rest
pub(crate) fn parse_checkbox(s: &str) -> Option<(bool, &str)> {
    let rest = s.strip_prefix("- [")?;
    let mut chars = rest.chars();
    let mark = chars.next()?;
    let rest = chars.as_str().strip_prefix(']')?;
    let completed = matches!(mark, 'x' | 'X');
    if mark != ' ' && !completed {
        return None;
    }
    Some((completed, rest.trim_start()))
}

pub(crate) struct ParsedHead {
    pub title: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
}

/// Split the anchor token off a task line body and parse the remaining
/// marker tokens. Returns `None` when no anchor token is present.
pub(crate) fn split_anchor(rest: &str) -> Option<(String, ParsedHead)> {
    let mut anchor = None;
    let mut remaining = Vec::new();
    for token in rest.split_whitespace() {
        match token.strip_prefix(ANCHOR_PREFIX) {
            Some(suffix)
                if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                // Last anchor token wins; the syntax puts it at the line end.
                anchor = Some(suffix.to_string());
            }
            _ => remaining.push(token),
        }
    }
    anchor.map(|id| (id, parse_markers(&remaining)))
}

/// Pull priority and due-date markers out of the title tokens.
/// Marker position is irrelevant, so reordering does not change meaning.
fn parse_markers(tokens: &[&str]) -> ParsedHead {
    let mut priority = Priority::Normal;
    let mut due_date = None;
    let mut title_parts: Vec<&str> = Vec::new();

    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        match *token {
            "⏫" => priority = Priority::High,
            "🔽" => priority = Priority::Low,
            "📅" => match iter.peek().and_then(|next| parse_date(next)) {
                Some(date) => {
                    due_date = Some(date);
                    iter.next();
                }
                None => title_parts.push(*token),
            },
            other => match other.strip_prefix("📅").and_then(parse_date) {
                Some(date) => due_date = Some(date),
                None => title_parts.push(other),
            },
        }
    }

    ParsedHead {
        title: title_parts.join(" "),
        priority,
        due_date,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub(crate) fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
