//! Output renderers and formatting helpers for CLI commands.

use chrono::TimeDelta;
use serde_json::Value;

use crate::client::CliError;

const NOT_LOGGED_IN: &str = "You are not logged in. Please log in and try again.";
const COLUMN_GAP: usize = 2;

/// Human-readable rendering of a non-200 response body.
///
/// Authentication failures collapse to a login hint; JSON objects are listed
/// as `key: value` lines; anything else is returned verbatim.
pub(crate) fn render_remote_error(body: &str) -> String {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    if let Some(Value::String(message)) = fields.get("error")
        && message.contains("access token")
    {
        return NOT_LOGGED_IN.to_string();
    }

    let mut entries: Vec<_> = fields.iter().collect();
    entries.sort_by(|left, right| left.0.cmp(right.0));
    entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key}: {text}"),
            other => format!("{key}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print the remote body of a [`CliError::RemoteStatus`] before handing the error back.
pub(crate) fn surface_remote_error(err: CliError) -> CliError {
    if let CliError::RemoteStatus { body, .. } = &err {
        println!("{}", render_remote_error(body));
    }
    err
}

/// Pretty-print a JSON body when possible, falling back to the raw text.
pub(crate) fn pretty_json(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.trim_end().to_string())
}

/// Title followed by an underline of `=` of the same width.
pub(crate) fn titled_block(title: &str, content: &str) -> String {
    format!("{title}\n{}\n{content}", "=".repeat(title.chars().count()))
}

/// Left-aligned table with columns sized to their widest cell.
pub(crate) fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let format_row = |cells: Vec<&str>| -> String {
        let last = cells.len().saturating_sub(1);
        cells
            .iter()
            .enumerate()
            .map(|(index, cell)| {
                if index == last {
                    (*cell).to_string()
                } else {
                    let pad = widths.get(index).copied().unwrap_or(0) + COLUMN_GAP;
                    format!("{cell:<pad$}")
                }
            })
            .collect::<String>()
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_row(headers.to_vec()));
    for row in rows {
        lines.push(format_row(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

/// Short age rendering using only the largest whole unit (`3 hours`, `1 day`).
pub(crate) fn format_age(age: TimeDelta) -> String {
    const UNITS: [(&str, i64); 5] = [
        ("week", 7 * 24 * 3600),
        ("day", 24 * 3600),
        ("hour", 3600),
        ("minute", 60),
        ("second", 1),
    ];

    let seconds = age.num_seconds().max(0);
    for (unit, size) in UNITS {
        let count = seconds / size;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            return format!("{count} {unit}{plural}");
        }
    }
    "0 seconds".to_string()
}
