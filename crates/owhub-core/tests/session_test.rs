#![allow(clippy::unwrap_used)]
// Collection sessions: manual stop, auto-stop, and the race between them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use owhub_core::{
    Channel, CollectionSession, ExportFormat, ExportOutcome, Hub, HubConfig, ManualClock,
    StaticToken, StopReason,
};

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_714_564_800, 0).unwrap()
}

fn hub() -> (Hub, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let hub = Hub::with_clock(
        HubConfig::default(),
        Arc::new(StaticToken::new("t")),
        clock.clone(),
    );
    (hub, clock)
}

fn log(msg: &str) -> String {
    format!(r#"{{"type":"LOG","log":{{"level":"info","msg":"{msg}"}}}}"#)
}

#[tokio::test(start_paused = true)]
async fn manual_stop_exports_window_since_start() {
    let (hub, clock) = hub();
    hub.ingest(Channel::Controller, &log("before"));
    clock.advance(TimeDelta::seconds(1));

    let session = CollectionSession::start(
        &hub,
        [Channel::Controller, Channel::Security],
        ExportFormat::Json,
        None,
    );
    hub.ingest(Channel::Controller, &log("during"));
    hub.ingest(Channel::Security, &log("also during"));
    // Same instant as the stop: must still be captured.
    assert!(session.stop());

    let report = session.finished().await;
    assert_eq!(report.stopped_by, StopReason::Manual);
    assert_eq!(report.request.start, t0() + TimeDelta::seconds(1));

    let ExportOutcome::Ready(export) = report.outcome else {
        panic!("expected rows");
    };
    let msgs: Vec<&str> = export.entries().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(msgs, vec!["during", "also during"]);
}

#[tokio::test(start_paused = true)]
async fn auto_stop_fires_once_and_manual_stop_becomes_noop() {
    let (hub, _) = hub();
    let session = CollectionSession::start(
        &hub,
        [Channel::Firmware],
        ExportFormat::Csv,
        Some(Duration::from_secs(30)),
    );
    hub.ingest(Channel::Firmware, &log("flashing"));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(session.is_finished());
    let report = session.report().unwrap();
    assert_eq!(report.stopped_by, StopReason::AutoStop);
    assert_eq!(report.outcome.len(), 1);

    hub.ingest(Channel::Firmware, &log("after"));
    assert!(!session.stop(), "second stop must not export again");
    assert_eq!(session.finished().await.outcome.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_stop_cancels_the_timer() {
    let (hub, _) = hub();
    let session = CollectionSession::start(
        &hub,
        [Channel::Controller],
        ExportFormat::Json,
        Some(Duration::from_secs(10)),
    );
    assert!(session.stop());
    tokio::time::sleep(Duration::from_secs(20)).await;

    let report = session.report().unwrap();
    assert_eq!(report.stopped_by, StopReason::Manual);
    assert!(report.outcome.is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_stops_export_exactly_once() {
    let (hub, _) = hub();
    hub.ingest(Channel::Controller, &log("x"));
    let session = CollectionSession::start(
        &hub,
        [Channel::Controller],
        ExportFormat::Json,
        Some(Duration::from_millis(5)),
    );
    hub.ingest(Channel::Controller, &log("y"));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let s = session.clone();
        tasks.push(tokio::spawn(async move { s.stop() }));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut performed = 0;
    for task in tasks {
        if task.await.unwrap() {
            performed += 1;
        }
    }
    let report = session.finished().await;
    let expected = usize::from(report.stopped_by == StopReason::Manual);
    assert_eq!(performed, expected);
    // Both events share the start instant of the frozen clock.
    assert_eq!(report.outcome.len(), 2);
}
