//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! JSON uses serde, plain emits one identifier per line. Streamed events
//! get a single-line form per format.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use owhub_core::{EventKind, LogEntry};

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Colour only for interactive terminals without `NO_COLOR`.
pub fn should_color() -> bool {
    io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::Plain => data.iter().map(id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Render a single item; table mode uses a pre-formatted detail view.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    Ok(match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::Plain => id_fn(data),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Streaming ────────────────────────────────────────────────────────

/// One line per event: NDJSON, bare message, or a coloured summary.
pub fn event_line(format: OutputFormat, entry: &LogEntry, color: bool) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(entry)?),
        OutputFormat::Plain => Ok(entry.message.clone()),
        OutputFormat::Table => Ok(summary_line(entry, color)),
    }
}

fn summary_line(entry: &LogEntry, color: bool) -> String {
    let ts = entry.timestamp.format("%H:%M:%S%.3f").to_string();
    let source = format!("{:<10}", entry.source.as_ref());
    let kind = format!("{:<29}", entry.kind.as_ref());
    let serial = entry
        .serial_number
        .as_ref()
        .map(|s| format!(" [{s}]"))
        .unwrap_or_default();
    let level = entry
        .level
        .as_deref()
        .map(|l| format!(" {l}:"))
        .unwrap_or_default();

    if !color {
        return format!("{ts} {source} {kind}{serial}{level} {}", entry.message);
    }

    let kind = match entry.kind {
        EventKind::DeviceConnection => kind.green().to_string(),
        EventKind::DeviceDisconnection => kind.red().to_string(),
        EventKind::Log => kind.cyan().to_string(),
        _ => kind.dimmed().to_string(),
    };
    format!(
        "{} {} {kind}{}{level} {}",
        ts.dimmed(),
        source.magenta(),
        serial.yellow(),
        entry.message
    )
}
