//! Writing task state back into vault text
//!
//! Pulls rewrite the anchored line (and its subtask checkboxes) in place,
//! preserving indentation and note lines; previously-unseen remote tasks are
//! materialized as a fresh block at the end of a document.

use crate::scanner::{leading_ws, parse_checkbox};
use crate::task::{Subtask, TaskPatch, ANCHOR_PREFIX};

/// Render the canonical single-line form of a task
pub fn render_task_line(patch: &TaskPatch, indent: &str, anchor_id: &str) -> String {
    let mark = if patch.completed { 'x' } else { ' ' };
    let mut line = format!("{}- [{}] {}", indent, mark, patch.title.trim());
    if let Some(marker) = patch.priority.marker() {
        line.push(' ');
        line.push_str(marker);
    }
    if let Some(date) = patch.due_date {
        line.push_str(&format!(" 📅 {}", date.format("%Y-%m-%d")));
    }
    line.push_str(&format!(" {}{}", ANCHOR_PREFIX, anchor_id));
    line
}

fn render_subtask_line(subtask: &Subtask, indent: &str) -> String {
    let mark = if subtask.completed { 'x' } else { ' ' };
    format!("{}- [{}] {}", indent, mark, subtask.text.trim())
}

/// Rewrite the anchored task block so it matches `patch`.
///
/// Returns `None` when the anchor is not present in the text. Note lines
/// inside the block are kept; subtask checkbox lines are replaced wholesale.
pub fn apply_patch_to_text(text: &str, anchor_id: &str, patch: &TaskPatch) -> Option<String> {
    let token = format!("{}{}", ANCHOR_PREFIX, anchor_id);
    let lines: Vec<&str> = text.lines().collect();

    let task_idx = lines.iter().position(|line| {
        parse_checkbox(line.trim_start()).is_some()
            && line.split_whitespace().any(|t| t == token)
    })?;

    let task_line = lines[task_idx];
    let indent_chars = leading_ws(task_line);
    // Leading whitespace is all single-byte chars, so char count == byte index.
    let indent = &task_line[..indent_chars];

    // Walk the block: remember where note lines are, and borrow the first
    // subtask's indentation for the rewritten checkboxes.
    let mut block_end = task_idx + 1;
    let mut notes: Vec<&str> = Vec::new();
    let mut sub_indent: Option<String> = None;
    while block_end < lines.len() {
        let line = lines[block_end];
        if line.trim().is_empty() || leading_ws(line) <= indent_chars {
            break;
        }
        if parse_checkbox(line.trim_start()).is_some() {
            if sub_indent.is_none() {
                let chars = leading_ws(line);
                sub_indent = Some(line[..chars].to_string());
            }
        } else {
            notes.push(line);
        }
        block_end += 1;
    }
    let sub_indent = sub_indent.unwrap_or_else(|| format!("{}    ", indent));

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + patch.subtasks.len());
    out.extend(lines[..task_idx].iter().map(|l| l.to_string()));
    out.push(render_task_line(patch, indent, anchor_id));
    for subtask in &patch.subtasks {
        out.push(render_subtask_line(subtask, &sub_indent));
    }
    out.extend(notes.iter().map(|l| l.to_string()));
    out.extend(lines[block_end..].iter().map(|l| l.to_string()));

    let mut result = out.join("\n");
    if text.ends_with('\n') {
        result.push('\n');
    }
    Some(result)
}

/// Append a new task block at the end of a document
pub fn append_task_block(text: &str, anchor_id: &str, patch: &TaskPatch) -> String {
    let mut result = text.to_string();
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(&render_task_line(patch, "", anchor_id));
    result.push('\n');
    for subtask in &patch.subtasks {
        result.push_str(&render_subtask_line(subtask, "    "));
        result.push('\n');
    }
    result
}
