//! Output formatting: table, JSON, plain, and live change lines.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one line per item.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use moonlink_core::{StateChange, StateEntry};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: converts each item with `to_row` and builds a rounded table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `plain`: calls `line_fn` on each item, one line per item
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    line_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Plain => Ok(data.iter().map(&line_fn).collect::<Vec<_>>().join("\n")),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`, since single-item views don't use
/// the `Tabled` derive.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    plain_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Plain => Ok(plain_fn(data)),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

// ── State tree rows ──────────────────────────────────────────────────

#[derive(Tabled)]
pub struct StateRow {
    #[tabled(rename = "Path")]
    pub path: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
    #[tabled(rename = "Type")]
    pub value_type: String,
    #[tabled(rename = "Role")]
    pub role: String,
    #[tabled(rename = "Ack")]
    pub ack: String,
}

impl From<&StateEntry> for StateRow {
    fn from(entry: &StateEntry) -> Self {
        Self {
            path: entry.path.clone(),
            value: entry.value.as_ref().map(ToString::to_string).unwrap_or_default(),
            unit: entry.meta.unit.clone(),
            value_type: entry.meta.value_type.to_string(),
            role: entry.meta.role.clone(),
            ack: if entry.ack { "✓".into() } else { String::new() },
        }
    }
}

/// `path = value` for plain output.
pub fn state_line(entry: &StateEntry) -> String {
    match &entry.value {
        Some(value) => format!("{} = {value}", entry.path),
        None => format!("{} =", entry.path),
    }
}

// ── Live change lines ────────────────────────────────────────────────

#[derive(Serialize)]
struct ChangeRecord<'a> {
    at: String,
    path: &'a str,
    value: &'a moonlink_core::StateValue,
    ack: bool,
}

/// One line for a streamed change, in the selected format.
pub fn change_line(format: &OutputFormat, change: &StateChange, color: bool) -> Result<String, CliError> {
    let at = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            let record = ChangeRecord {
                at,
                path: &change.path,
                value: &change.value,
                ack: change.ack,
            };
            Ok(serde_json::to_string(&record)?)
        }
        OutputFormat::Plain => Ok(format!("{} = {}", change.path, change.value)),
        OutputFormat::Table => {
            let marker = if change.ack { "" } else { " (pending)" };
            if color {
                Ok(format!(
                    "{} {} = {}{}",
                    at.dimmed(),
                    change.path.cyan(),
                    change.value.to_string().bold(),
                    marker.yellow()
                ))
            } else {
                Ok(format!("{at} {} = {}{marker}", change.path, change.value))
            }
        }
    }
}

/// Keep only entries at or below `prefix`.
pub fn under_prefix(path: &str, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(prefix) => {
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
    }
}
