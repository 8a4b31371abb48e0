#![allow(clippy::unwrap_used)]
// Integration tests for `Hub`: intake, dispatch, subscriptions and export.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;

use owhub_core::{
    BufferedEvent, Channel, Event, EventKind, ExportFormat, ExportOutcome, ExportRequest, Hub,
    HubConfig, Interest, LogEntry, LogExport, ManualClock, Mode, SerialNumber, StaticToken,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn hub_with_clock() -> (Hub, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let hub = Hub::with_clock(
        HubConfig::default(),
        Arc::new(StaticToken::new("t")),
        clock.clone(),
    );
    (hub, clock)
}

fn device_frame(kind: &str, serial: &str) -> String {
    format!(r#"{{"type":"{kind}","serialNumber":"{serial}"}}"#)
}

fn log_frame(level: &str, msg: &str) -> String {
    serde_json::json!({
        "type": "LOG",
        "log": { "level": level, "msg": msg, "thread_id": 4, "thread_name": "cfg" }
    })
    .to_string()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&BufferedEvent) + Send + Sync + 'static) {
    let n = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&n);
    (n, move |_: &BufferedEvent| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

// ── Dispatch ────────────────────────────────────────────────────────

#[test]
fn reboot_confirmation_fires_each_effect_once_in_order() {
    let (hub, _) = hub_with_clock();
    let seen: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    let confirmation = hub.confirm_device_command(
        Channel::Controller,
        "24:F5:A2:00:00:01",
        "reboot",
        move |e: &BufferedEvent| log.lock().unwrap().push(e.kind()),
    );
    assert!(confirmation.created());

    hub.ingest(Channel::Controller, &device_frame("DEVICE_DISCONNECTION", "24f5a2000001"));
    hub.ingest(Channel::Controller, &device_frame("DEVICE_CONNECTION", "24f5a2000001"));
    hub.ingest(Channel::Controller, &device_frame("DEVICE_CONNECTION", "24f5a2000001"));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![EventKind::DeviceDisconnection, EventKind::DeviceConnection]
    );
    assert_eq!(hub.subscription_count(Channel::Controller), 0);
    drop(confirmation);
}

#[test]
fn re_registering_a_pending_confirmation_shows_it_once() {
    let (hub, _) = hub_with_clock();
    let (first, cb1) = counter();
    let (second, cb2) = counter();

    let a = hub.confirm_device_command(Channel::Controller, "x1", "reboot", cb1);
    let b = hub.confirm_device_command(Channel::Controller, "X1", "reboot", cb2);
    assert!(!b.created());
    drop(b);

    hub.ingest(Channel::Controller, &device_frame("DEVICE_DISCONNECTION", "x1"));
    hub.ingest(Channel::Controller, &device_frame("DEVICE_CONNECTION", "x1"));
    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(Ordering::SeqCst), 0);

    // A second command after the first pair fired registers fresh waiters.
    let (third, cb3) = counter();
    let c = hub.confirm_device_command(Channel::Controller, "x1", "reboot", cb3);
    assert!(c.created());
    hub.ingest(Channel::Controller, &device_frame("DEVICE_CONNECTION", "x1"));
    assert_eq!(third.load(Ordering::SeqCst), 1);
    let _ = (a, c);
}

#[test]
fn different_purposes_do_not_collide() {
    let (hub, _) = hub_with_clock();
    let (reboot, cb1) = counter();
    let (upgrade, cb2) = counter();
    let _a = hub.confirm_device_command(Channel::Controller, "x1", "reboot", cb1);
    let _b = hub.confirm_device_command(Channel::Controller, "x1", "upgrade", cb2);

    hub.ingest(Channel::Controller, &device_frame("DEVICE_CONNECTION", "x1"));
    assert_eq!(reboot.load(Ordering::SeqCst), 1);
    assert_eq!(upgrade.load(Ordering::SeqCst), 1);
}

#[test]
fn one_shot_burst_and_persistent_counts() {
    let (hub, _) = hub_with_clock();
    let (once, cb1) = counter();
    let (every, cb2) = counter();
    let _g1 = hub.subscribe(
        Channel::Security,
        Interest::kind(EventKind::Log),
        cb1,
        Mode::OneShot,
    );
    let g2 = hub.subscribe(
        Channel::Security,
        Interest::kind(EventKind::Log),
        cb2,
        Mode::Persistent,
    );

    for i in 0..25 {
        hub.ingest(Channel::Security, &log_frame("info", &format!("m{i}")));
    }
    assert_eq!(once.load(Ordering::SeqCst), 1);
    assert_eq!(every.load(Ordering::SeqCst), 25);

    let id = g2.id();
    assert!(hub.unsubscribe(Channel::Security, id));
    assert!(!hub.unsubscribe(Channel::Security, id));
    drop(g2);
    hub.ingest(Channel::Security, &log_frame("info", "late"));
    assert_eq!(every.load(Ordering::SeqCst), 25);
}

#[test]
fn channels_never_share_subscriptions() {
    let (hub, _) = hub_with_clock();
    let (n, cb) = counter();
    let _g = hub.subscribe(
        Channel::Firmware,
        Interest::kind(EventKind::Log),
        cb,
        Mode::Persistent,
    );
    hub.ingest(Channel::Controller, &log_frame("info", "elsewhere"));
    assert_eq!(n.load(Ordering::SeqCst), 0);
    hub.ingest(Channel::Firmware, &log_frame("info", "here"));
    assert_eq!(n.load(Ordering::SeqCst), 1);
}

#[test]
fn generic_frames_are_buffered_not_dispatched() {
    let (hub, _) = hub_with_clock();
    let (n, cb) = counter();
    let _g = hub.subscribe(
        Channel::Controller,
        Interest::kind(EventKind::Generic),
        cb,
        Mode::Persistent,
    );
    let mut tail = hub.events(Channel::Controller);

    let entry = hub
        .ingest(Channel::Controller, r#"{"type":"UPGRADE_PROGRESS","pct":40}"#)
        .unwrap();
    assert_eq!(entry.kind(), EventKind::Generic);
    assert!(hub.ingest(Channel::Controller, "garbage").is_none());

    assert_eq!(n.load(Ordering::SeqCst), 0);
    assert_eq!(hub.buffered_len(Channel::Controller), 1);
    assert_eq!(tail.try_recv().unwrap().seq, entry.seq);
}

#[test]
fn buffer_respects_configured_capacity() {
    let config = HubConfig {
        buffer_capacity: 4,
        ..HubConfig::default()
    };
    let hub = Hub::new(config, Arc::new(StaticToken::new("t")));
    for i in 0..10 {
        hub.ingest(Channel::Controller, &log_frame("info", &format!("m{i}")));
    }
    assert_eq!(hub.buffered_len(Channel::Controller), 4);
    let seqs: Vec<u64> = hub.query(Channel::Controller, |_| true).map(|e| e.seq).collect();
    assert_eq!(seqs, vec![6, 7, 8, 9]);
}

// ── Waiters ─────────────────────────────────────────────────────────

#[tokio::test]
async fn wait_for_resolves_on_first_match() {
    let (hub, _) = hub_with_clock();
    let waiter = hub.wait_for(
        Channel::Controller,
        Interest::device(EventKind::DeviceConnection, "ab01"),
    );

    let feeder = hub.clone();
    tokio::spawn(async move {
        feeder.ingest(Channel::Controller, &device_frame("DEVICE_CONNECTION", "ffff"));
        feeder.ingest(Channel::Controller, &device_frame("DEVICE_CONNECTION", "AB:01"));
    });

    let event = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.serial_number(), Some(&SerialNumber::new("ab01")));
    assert_eq!(hub.subscription_count(Channel::Controller), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_waiter_leaves_nothing_behind() {
    let (hub, _) = hub_with_clock();
    let waiter = hub.wait_for(
        Channel::Controller,
        Interest::device(EventKind::DeviceConnection, "ab01"),
    );
    assert_eq!(hub.subscription_count(Channel::Controller), 1);

    let result = tokio::time::timeout(Duration::from_secs(120), waiter).await;
    assert!(result.is_err());
    assert_eq!(hub.subscription_count(Channel::Controller), 0);
}

// ── Export ──────────────────────────────────────────────────────────

#[test]
fn export_merges_channels_in_timestamp_order() {
    let (hub, clock) = hub_with_clock();
    hub.ingest(Channel::Security, &log_frame("info", "s0"));
    hub.ingest(Channel::Controller, &log_frame("info", "c0"));
    clock.advance(TimeDelta::seconds(1));
    hub.ingest(Channel::Controller, &log_frame("info", "c1"));
    hub.ingest(Channel::Security, &log_frame("info", "s1"));
    clock.advance(TimeDelta::seconds(1));
    hub.ingest(Channel::Security, &log_frame("info", "s2"));

    let request = ExportRequest::new(t0(), t0() + TimeDelta::seconds(10), ExportFormat::Json)
        .with_channels([Channel::Controller, Channel::Security]);
    let export = hub.export_logs(&request).into_export().unwrap();
    let msgs: Vec<&str> = export.entries().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(msgs, vec!["c0", "s0", "c1", "s1", "s2"]);
}

#[test]
fn log_entries_preserve_level_thread_and_message() {
    let (hub, _) = hub_with_clock();
    let original = "radio 2G: channel changed to 6, \"auto\"";
    hub.ingest(Channel::Controller, &log_frame("warning", original));

    let request = ExportRequest::new(t0(), t0() + TimeDelta::seconds(1), ExportFormat::Json);
    let export = hub.export_logs(&request).into_export().unwrap();
    let entry: &LogEntry = &export.entries()[0];
    assert_eq!(entry.level.as_deref(), Some("warning"));
    assert_eq!(entry.thread.as_deref(), Some("cfg"));
    assert_eq!(entry.message, original);
}

#[test]
fn empty_window_is_not_an_error() {
    let (hub, clock) = hub_with_clock();
    hub.ingest(Channel::Controller, &log_frame("info", "old"));
    clock.advance(TimeDelta::minutes(5));

    let start = hub.now();
    let request = ExportRequest::new(start, start + TimeDelta::minutes(1), ExportFormat::Json);
    let outcome = hub.export_logs(&request);
    assert!(matches!(outcome, ExportOutcome::Empty));

    let json = LogExport::new(&request, Vec::new()).to_json(start).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["totalLogs"], 0);
    assert_eq!(doc["entries"].as_array().unwrap().len(), 0);
}

#[test]
fn csv_round_trips_through_a_standard_parser() {
    let (hub, _) = hub_with_clock();
    let message = r#"He said "hi""#;
    hub.ingest(Channel::Controller, &log_frame("info", message));
    hub.ingest(
        Channel::Controller,
        r#"{"type":"DEVICE_CONNECTIONS_STATISTICS","content":{"note":"a,b \"c\""}}"#,
    );

    let request = ExportRequest::new(t0(), t0() + TimeDelta::seconds(1), ExportFormat::Csv);
    let csv_text = hub.export_logs(&request).into_export().unwrap().to_csv().unwrap();

    let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec![
            "timestamp",
            "source",
            "type",
            "level",
            "thread",
            "serialNumber",
            "message",
            "rawData"
        ]
    );

    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][6], message);
    assert_eq!(&rows[0][3], "info");
    assert_eq!(&rows[1][2], "DEVICE_CONNECTIONS_STATISTICS");
    let raw: serde_json::Value = serde_json::from_str(&rows[1][7]).unwrap();
    assert_eq!(raw["note"], "a,b \"c\"");
}

#[test]
fn export_writes_timestamped_file() {
    let (hub, _) = hub_with_clock();
    hub.ingest(Channel::Firmware, &log_frame("info", "flash ok"));
    let request = ExportRequest::new(t0(), t0() + TimeDelta::seconds(1), ExportFormat::Csv);
    let export = hub.export_logs(&request).into_export().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = export.save(dir.path(), t0()).unwrap();
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "owhub-logs-20240501-120000.csv"
    );
    let body = std::fs::read_to_string(path).unwrap();
    assert!(body.contains("\"flash ok\""));
}

#[test]
fn typed_event_publish_matches_ingest() {
    let (hub, _) = hub_with_clock();
    let (n, cb) = counter();
    let _g = hub.subscribe(
        Channel::Controller,
        Interest::device(EventKind::DeviceStatistics, "ab"),
        cb,
        Mode::Persistent,
    );
    hub.publish(
        Channel::Controller,
        Event::DeviceStatistics {
            serial_number: SerialNumber::new("AB"),
        },
    );
    assert_eq!(n.load(Ordering::SeqCst), 1);
}
