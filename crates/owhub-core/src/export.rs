//! Log export: time-windowed, multi-channel, JSON or CSV.
//!
//! Works on buffer snapshots only, never on the live dispatch path.
//! Each requested channel is filtered to `[start, end)`, mapped to a
//! flat [`LogEntry`], and the per-channel lists are merged by timestamp
//! with a stable sort: equal timestamps keep request channel order, then
//! buffer order.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::debug;

use crate::error::ExportError;
use crate::model::{BufferedEvent, Channel, Event, EventKind, SerialNumber};

/// CSV header row, in column order.
pub const CSV_HEADER: &str = "timestamp,source,type,level,thread,serialNumber,message,rawData";

// ── Request ─────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    /// Inclusive.
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
    /// Merge order for equal timestamps follows this order.
    pub channels: IndexSet<Channel>,
    pub format: ExportFormat,
    /// Include frames the decoder couldn't type as raw-only rows.
    pub include_unrecognized: bool,
}

impl ExportRequest {
    /// All channels, unrecognized frames included.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, format: ExportFormat) -> Self {
        Self {
            start,
            end,
            channels: Channel::ALL.into_iter().collect(),
            format,
            include_unrecognized: true,
        }
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Window length; zero for an inverted window.
    pub fn window(&self) -> Duration {
        let ms = (self.end - self.start).num_milliseconds();
        Duration::from_millis(u64::try_from(ms).unwrap_or(0))
    }
}

// ── Log entries ─────────────────────────────────────────────────────

/// One flattened export row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub source: Channel,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<SerialNumber>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
}

impl From<&BufferedEvent> for LogEntry {
    fn from(buffered: &BufferedEvent) -> Self {
        let mut entry = LogEntry {
            source: buffered.channel,
            timestamp: buffered.timestamp,
            kind: buffered.kind(),
            level: None,
            thread: None,
            serial_number: None,
            message: String::new(),
            raw_data: None,
        };

        match buffered.event.as_ref() {
            Event::Log {
                level,
                thread_id,
                thread_name,
                message,
            } => {
                entry.level = Some(level.clone());
                entry.thread = thread_name
                    .clone()
                    .or_else(|| thread_id.map(|id| id.to_string()));
                entry.message.clone_from(message);
            }
            Event::DeviceConnection { serial_number } => {
                entry.message = format!("Device {serial_number} connected");
                entry.serial_number = Some(serial_number.clone());
            }
            Event::DeviceDisconnection { serial_number } => {
                entry.message = format!("Device {serial_number} disconnected");
                entry.serial_number = Some(serial_number.clone());
            }
            Event::DeviceStatistics { serial_number } => {
                entry.message = format!("Statistics received from {serial_number}");
                entry.serial_number = Some(serial_number.clone());
            }
            Event::DeviceConnectionsStatistics { payload } => {
                entry.message = "Connection statistics update".into();
                entry.raw_data = Some(payload.to_string());
            }
            Event::Generic { raw } => {
                entry.message = "Unrecognized frame".into();
                entry.raw_data = Some(raw.clone());
            }
        }
        entry
    }
}

/// Buffer contents per channel, as captured by one snapshot.
pub type ChannelSnapshots = IndexMap<Channel, Vec<BufferedEvent>>;

/// Filter, map and merge. Channels missing from `snapshots` contribute
/// nothing. Pure: the same inputs always give the same rows.
pub fn export_logs(snapshots: &ChannelSnapshots, request: &ExportRequest) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = request
        .channels
        .iter()
        .filter_map(|channel| snapshots.get(channel))
        .flatten()
        .filter(|e| request.contains(e.timestamp))
        .filter(|e| request.include_unrecognized || e.kind() != EventKind::Generic)
        .map(LogEntry::from)
        .collect();

    // Stable: ties keep channel order, then buffer order.
    entries.sort_by_key(|e| e.timestamp);
    entries
}

// ── Outcome ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Ready(LogExport),
    /// Nothing in the window. Not an error.
    Empty,
}

impl ExportOutcome {
    pub fn from_snapshots(snapshots: &ChannelSnapshots, request: &ExportRequest) -> Self {
        let entries = export_logs(snapshots, request);
        if entries.is_empty() {
            debug!(start = %request.start, end = %request.end, "export window is empty");
            Self::Empty
        } else {
            Self::Ready(LogExport::new(request, entries))
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Exported rows; zero when empty.
    pub fn len(&self) -> usize {
        match self {
            Self::Ready(export) => export.len(),
            Self::Empty => 0,
        }
    }

    pub fn into_export(self) -> Option<LogExport> {
        match self {
            Self::Ready(export) => Some(export),
            Self::Empty => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonDocument<'a> {
    exported_at: DateTime<Utc>,
    window_duration: String,
    total_count: usize,
    total_logs: usize,
    entries: &'a [LogEntry],
}

/// Merged rows of one export, ready to serialize.
#[derive(Debug, Clone)]
pub struct LogExport {
    window: Duration,
    format: ExportFormat,
    entries: Vec<LogEntry>,
}

impl LogExport {
    pub fn new(request: &ExportRequest, entries: Vec<LogEntry>) -> Self {
        Self {
            window: request.window(),
            format: request.format,
            entries,
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn to_json(&self, exported_at: DateTime<Utc>) -> Result<String, ExportError> {
        let doc = JsonDocument {
            exported_at,
            window_duration: humantime::format_duration(self.window).to_string(),
            total_count: self.entries.len(),
            total_logs: self.entries.len(),
            entries: &self.entries,
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Header plus one row per entry. `message` and `rawData` are always
    /// quoted; other columns only when they contain a delimiter.
    pub fn write_csv<W: Write>(&self, mut out: W) -> Result<(), ExportError> {
        writeln!(out, "{CSV_HEADER}")?;
        let mut row = String::new();
        for entry in &self.entries {
            row.clear();
            csv_row(&mut row, entry);
            out.write_all(row.as_bytes())?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn to_csv(&self) -> Result<String, ExportError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| ExportError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Serialize in this export's format.
    pub fn render(&self, exported_at: DateTime<Utc>) -> Result<String, ExportError> {
        match self.format {
            ExportFormat::Json => self.to_json(exported_at),
            ExportFormat::Csv => self.to_csv(),
        }
    }

    /// Write `owhub-logs-<stamp>.<ext>` into `dir` and return its path.
    pub fn save(&self, dir: &Path, exported_at: DateTime<Utc>) -> Result<PathBuf, ExportError> {
        let path = dir.join(export_file_name(self.format, exported_at));
        let body = self.render(exported_at)?;
        std::fs::write(&path, body)?;
        debug!(path = %path.display(), rows = self.entries.len(), "export written");
        Ok(path)
    }
}

/// `owhub-logs-20240501-120000.csv`
pub fn export_file_name(format: ExportFormat, at: DateTime<Utc>) -> String {
    format!(
        "owhub-logs-{}.{}",
        at.format("%Y%m%d-%H%M%S"),
        format.extension()
    )
}

// ── CSV encoding ────────────────────────────────────────────────────

fn csv_row(row: &mut String, entry: &LogEntry) {
    let timestamp = entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    let serial = entry.serial_number.as_ref().map(SerialNumber::as_str);
    let fields = [
        Some(timestamp.as_str()),
        Some(entry.source.as_ref()),
        Some(entry.kind.as_ref()),
        entry.level.as_deref(),
        entry.thread.as_deref(),
        serial,
    ];
    for field in fields {
        push_plain(row, field.unwrap_or_default());
        row.push(',');
    }
    push_quoted(row, &entry.message);
    row.push(',');
    push_quoted(row, entry.raw_data.as_deref().unwrap_or_default());
    row.push('\n');
}

fn push_quoted(row: &mut String, value: &str) {
    row.push('"');
    row.push_str(&value.replace('"', "\"\""));
    row.push('"');
}

fn push_plain(row: &mut String, value: &str) {
    if value.contains([',', '"', '\n', '\r']) {
        push_quoted(row, value);
    } else {
        row.push_str(value);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;

    fn t(s: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_714_564_800 + s, 0).unwrap()
    }

    fn buffered(channel: Channel, seq: u64, at: DateTime<Utc>, event: Event) -> BufferedEvent {
        BufferedEvent {
            channel,
            seq,
            timestamp: at,
            event: Arc::new(event),
        }
    }

    fn log(msg: &str) -> Event {
        Event::Log {
            level: "info".into(),
            thread_id: Some(3),
            thread_name: None,
            message: msg.into(),
        }
    }

    #[test]
    fn maps_every_kind_without_failing() {
        let sn = SerialNumber::new("aa01");
        let cases = [
            (log("boot"), "boot"),
            (
                Event::DeviceConnection {
                    serial_number: sn.clone(),
                },
                "Device aa01 connected",
            ),
            (
                Event::DeviceDisconnection {
                    serial_number: sn.clone(),
                },
                "Device aa01 disconnected",
            ),
            (
                Event::DeviceStatistics { serial_number: sn },
                "Statistics received from aa01",
            ),
            (
                Event::DeviceConnectionsStatistics {
                    payload: serde_json::json!({"connected": 3}),
                },
                "Connection statistics update",
            ),
            (
                Event::Generic {
                    raw: "{\"x\":1}".into(),
                },
                "Unrecognized frame",
            ),
        ];
        for (event, message) in cases {
            let entry = LogEntry::from(&buffered(Channel::Controller, 0, t(0), event));
            assert_eq!(entry.message, message);
        }
    }

    #[test]
    fn log_thread_prefers_name() {
        let named = Event::Log {
            level: "debug".into(),
            thread_id: Some(9),
            thread_name: Some("radio".into()),
            message: "m".into(),
        };
        let entry = LogEntry::from(&buffered(Channel::Firmware, 0, t(0), named));
        assert_eq!(entry.thread.as_deref(), Some("radio"));

        let numbered = LogEntry::from(&buffered(Channel::Firmware, 1, t(0), log("m")));
        assert_eq!(numbered.thread.as_deref(), Some("3"));
    }

    #[test]
    fn window_is_half_open() {
        let mut snaps = ChannelSnapshots::new();
        snaps.insert(
            Channel::Controller,
            vec![
                buffered(Channel::Controller, 0, t(9), log("before")),
                buffered(Channel::Controller, 1, t(10), log("start")),
                buffered(Channel::Controller, 2, t(19), log("inside")),
                buffered(Channel::Controller, 3, t(20), log("end")),
            ],
        );
        let request = ExportRequest::new(t(10), t(20), ExportFormat::Json);
        let msgs: Vec<String> = export_logs(&snaps, &request)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(msgs, vec!["start", "inside"]);
    }

    #[test]
    fn merge_is_stable_across_channels() {
        let mut snaps = ChannelSnapshots::new();
        snaps.insert(
            Channel::Security,
            vec![
                buffered(Channel::Security, 0, t(1), log("s1")),
                buffered(Channel::Security, 1, t(2), log("s2")),
                buffered(Channel::Security, 2, t(2), log("s3")),
            ],
        );
        snaps.insert(
            Channel::Controller,
            vec![
                buffered(Channel::Controller, 0, t(0), log("c1")),
                buffered(Channel::Controller, 1, t(2), log("c2")),
                buffered(Channel::Controller, 2, t(3), log("c3")),
            ],
        );

        let request = ExportRequest::new(t(0), t(10), ExportFormat::Csv)
            .with_channels([Channel::Controller, Channel::Security]);
        let entries = export_logs(&snaps, &request);
        let msgs: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["c1", "s1", "c2", "s2", "s3", "c3"]);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        // Reversing the request order flips the tie.
        let request = request.with_channels([Channel::Security, Channel::Controller]);
        let msgs: Vec<String> = export_logs(&snaps, &request)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(msgs, vec!["c1", "s1", "s2", "s3", "c2", "c3"]);
    }

    #[test]
    fn unrecognized_frames_are_optional() {
        let mut snaps = ChannelSnapshots::new();
        snaps.insert(
            Channel::Firmware,
            vec![
                buffered(Channel::Firmware, 0, t(1), Event::Generic { raw: "{}".into() }),
                buffered(Channel::Firmware, 1, t(2), log("typed")),
            ],
        );
        let mut request = ExportRequest::new(t(0), t(5), ExportFormat::Json);
        assert_eq!(export_logs(&snaps, &request).len(), 2);
        request.include_unrecognized = false;
        assert_eq!(export_logs(&snaps, &request).len(), 1);
    }

    #[test]
    fn empty_window_is_distinct_and_still_serializes() {
        let request = ExportRequest::new(t(0), t(60), ExportFormat::Json);
        let outcome = ExportOutcome::from_snapshots(&ChannelSnapshots::new(), &request);
        assert!(outcome.is_empty());

        let json = LogExport::new(&request, Vec::new()).to_json(t(61)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["totalLogs"], 0);
        assert_eq!(doc["totalCount"], 0);
        assert_eq!(doc["entries"], serde_json::json!([]));
        assert_eq!(doc["windowDuration"], "1m");
    }

    #[test]
    fn json_document_shape() {
        let mut snaps = ChannelSnapshots::new();
        snaps.insert(
            Channel::Controller,
            vec![buffered(
                Channel::Controller,
                0,
                t(1),
                Event::DeviceConnection {
                    serial_number: SerialNumber::new("AA:01"),
                },
            )],
        );
        let request = ExportRequest::new(t(0), t(0) + TimeDelta::seconds(90), ExportFormat::Json);
        let export = ExportOutcome::from_snapshots(&snaps, &request)
            .into_export()
            .unwrap();

        let doc: serde_json::Value = serde_json::from_str(&export.to_json(t(100)).unwrap()).unwrap();
        assert_eq!(doc["totalLogs"], 1);
        assert_eq!(doc["windowDuration"], "1m 30s");
        let entry = &doc["entries"][0];
        assert_eq!(entry["source"], "controller");
        assert_eq!(entry["type"], "DEVICE_CONNECTION");
        assert_eq!(entry["serialNumber"], "aa01");
        assert!(entry.get("level").is_none());

        let back: LogEntry = serde_json::from_value(entry.clone()).unwrap();
        assert_eq!(back, export.entries()[0]);
    }

    #[test]
    fn csv_quotes_free_text_only() {
        let mut snaps = ChannelSnapshots::new();
        snaps.insert(
            Channel::Security,
            vec![buffered(Channel::Security, 0, t(0), log(r#"He said "hi""#))],
        );
        let request = ExportRequest::new(t(0), t(1), ExportFormat::Csv);
        let csv = ExportOutcome::from_snapshots(&snaps, &request)
            .into_export()
            .unwrap()
            .to_csv()
            .unwrap();

        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), CSV_HEADER);
        assert_eq!(
            lines.next().unwrap(),
            r#"2024-05-01T12:00:00.000Z,security,LOG,info,3,,"He said ""hi""","""#
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn file_name_is_timestamped() {
        assert_eq!(
            export_file_name(ExportFormat::Csv, t(0)),
            "owhub-logs-20240501-120000.csv"
        );
        assert_eq!(
            export_file_name(ExportFormat::Json, t(61)),
            "owhub-logs-20240501-120101.json"
        );
    }
}
