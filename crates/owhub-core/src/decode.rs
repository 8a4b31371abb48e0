// ── Frame decoding ──
//
// Turns one raw text frame into a typed `Event`. Classification goes by
// the `type` discriminant first; field validation second. Anything that
// parses as a JSON object but doesn't fit a known shape becomes
// `Event::Generic` so exports still see it.

use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{Event, EventKind, SerialNumber};

/// Decode one inbound frame. `None` means the frame is not a JSON object
/// and was dropped.
pub fn decode(raw: &str) -> Option<Event> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "dropping non-JSON frame");
            return None;
        }
    };
    let Value::Object(frame) = value else {
        debug!("dropping non-object frame");
        return None;
    };

    let kind = frame
        .get("type")
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<EventKind>().ok());

    let decoded = match kind {
        Some(EventKind::Log) => decode_log(&frame),
        Some(
            kind @ (EventKind::DeviceConnection
            | EventKind::DeviceDisconnection
            | EventKind::DeviceStatistics),
        ) => decode_device(kind, &frame),
        Some(EventKind::DeviceConnectionsStatistics) => {
            Some(decode_connections_statistics(frame))
        }
        // `GENERIC` on the wire is just another unknown shape.
        Some(EventKind::Generic) | None => None,
    };

    Some(decoded.unwrap_or_else(|| Event::Generic {
        raw: raw.to_owned(),
    }))
}

fn decode_log(frame: &Map<String, Value>) -> Option<Event> {
    let log = frame.get("log")?.as_object()?;
    let message = log.get("msg")?.as_str()?.to_owned();
    let level = log.get("level")?.as_str()?.to_owned();

    // Optional fields must still have the right shape when present.
    let thread_id = match log.get("thread_id") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64()?),
    };
    let thread_name = match log.get("thread_name") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_str()?.to_owned()),
    };

    Some(Event::Log {
        level,
        thread_id,
        thread_name,
        message,
    })
}

fn decode_device(kind: EventKind, frame: &Map<String, Value>) -> Option<Event> {
    let raw_serial = frame
        .get("serialNumber")
        .and_then(Value::as_str)
        .or_else(|| frame.get("content")?.get("serialNumber")?.as_str())?;
    let serial_number = SerialNumber::new(raw_serial);
    if serial_number.is_empty() {
        return None;
    }

    Some(match kind {
        EventKind::DeviceConnection => Event::DeviceConnection { serial_number },
        EventKind::DeviceDisconnection => Event::DeviceDisconnection { serial_number },
        _ => Event::DeviceStatistics { serial_number },
    })
}

fn decode_connections_statistics(mut frame: Map<String, Value>) -> Event {
    let payload = match frame.remove("content").or_else(|| frame.remove("payload")) {
        Some(payload) => payload,
        None => Value::Object(frame),
    };
    Event::DeviceConnectionsStatistics { payload }
}
