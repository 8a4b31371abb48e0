// ── Channel identity ──
//
// The three independent streaming backends. Each owns its own
// connection, event buffer and subscription registry.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Channel {
    /// Device gateway: device connections, statistics, logs.
    Controller,
    /// Security service: login/audit logs.
    Security,
    /// Firmware service: upgrade progress, firmware logs.
    Firmware,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Controller, Channel::Security, Channel::Firmware];

    /// Stable slot index, also the lock order for multi-channel snapshots.
    pub const fn index(self) -> usize {
        match self {
            Self::Controller => 0,
            Self::Security => 1,
            Self::Firmware => 2,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Controller".parse::<Channel>().unwrap(), Channel::Controller);
        assert_eq!("FIRMWARE".parse::<Channel>().unwrap(), Channel::Firmware);
        assert!("gateway".parse::<Channel>().is_err());
    }

    #[test]
    fn displays_lowercase() {
        assert_eq!(Channel::Security.to_string(), "security");
        assert_eq!(
            serde_json::to_string(&Channel::Controller).unwrap(),
            "\"controller\""
        );
    }

    #[test]
    fn indexes_are_distinct() {
        let idx: Vec<usize> = Channel::ALL.iter().map(|c| c.index()).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }
}
