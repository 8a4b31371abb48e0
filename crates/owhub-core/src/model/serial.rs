// ── Device serial numbers ──
//
// The correlation key between device commands and the events that
// confirm them. Devices report serials in several spellings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device serial, normalized to lowercase hex with separators stripped
/// (`AA:BB:CC:00:11:22` and `aabbcc001122` are the same device).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SerialNumber(String);

impl SerialNumber {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw
            .as_ref()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SerialNumber {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for SerialNumber {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SerialNumber {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<SerialNumber> for String {
    fn from(sn: SerialNumber) -> Self {
        sn.0
    }
}
