// ── Event domain types ──

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::channel::Channel;
use super::serial::SerialNumber;

/// Discriminant of an [`Event`]; also the `type` field of inbound frames.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum EventKind {
    Log,
    DeviceConnection,
    DeviceDisconnection,
    DeviceStatistics,
    DeviceConnectionsStatistics,
    Generic,
}

impl EventKind {
    /// Kinds whose events carry a device serial number.
    pub const fn carries_serial(self) -> bool {
        matches!(
            self,
            Self::DeviceConnection | Self::DeviceDisconnection | Self::DeviceStatistics
        )
    }
}

/// A normalized notification decoded from one inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Event {
    Log {
        level: String,
        thread_id: Option<u64>,
        thread_name: Option<String>,
        message: String,
    },
    DeviceConnection {
        serial_number: SerialNumber,
    },
    DeviceDisconnection {
        serial_number: SerialNumber,
    },
    DeviceStatistics {
        serial_number: SerialNumber,
    },
    DeviceConnectionsStatistics {
        payload: serde_json::Value,
    },
    /// Anything that didn't match a known shape. Buffered and exported,
    /// never dispatched to typed subscribers.
    Generic {
        raw: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Log { .. } => EventKind::Log,
            Self::DeviceConnection { .. } => EventKind::DeviceConnection,
            Self::DeviceDisconnection { .. } => EventKind::DeviceDisconnection,
            Self::DeviceStatistics { .. } => EventKind::DeviceStatistics,
            Self::DeviceConnectionsStatistics { .. } => EventKind::DeviceConnectionsStatistics,
            Self::Generic { .. } => EventKind::Generic,
        }
    }

    pub fn serial_number(&self) -> Option<&SerialNumber> {
        match self {
            Self::DeviceConnection { serial_number }
            | Self::DeviceDisconnection { serial_number }
            | Self::DeviceStatistics { serial_number } => Some(serial_number),
            Self::Log { .. } | Self::DeviceConnectionsStatistics { .. } | Self::Generic { .. } => {
                None
            }
        }
    }
}

/// One entry of a channel's event buffer.
///
/// `timestamp` is assigned locally when the event is appended, never
/// taken from the server, so it totally orders a channel's events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedEvent {
    pub channel: Channel,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: Arc<Event>,
}

impl BufferedEvent {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn serial_number(&self) -> Option<&SerialNumber> {
        self.event.serial_number()
    }
}
