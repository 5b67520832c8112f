//! Records produced by the logger and the small enums that shape them.

use crate::attr::{lookup, Attrs, Attr, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::Level;

/// How bodies are captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Read the whole body into memory up front and forward a replayable copy.
    #[default]
    Drain,
    /// Capture bytes as they stream past; the record is finalized when the body is
    /// closed or dropped.
    Tee,
}

/// Which side of the process the traffic crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A request served by this process.
    Inbound,
    /// A call made by this process.
    Outbound,
}

impl Direction {
    /// Record message for this direction.
    pub fn message(self) -> &'static str {
        match self {
            Direction::Inbound => "http inbound",
            Direction::Outbound => "http outbound",
        }
    }

    /// Attribute key used when the wrapped service itself fails.
    pub fn error_key(self) -> &'static str {
        match self {
            Direction::Inbound => "serveError",
            Direction::Outbound => "sendError",
        }
    }
}

/// One log record per transaction.
///
/// # Examples
///
/// ```rust
/// use httplog::attr::Attr;
/// use httplog::types::{Direction, LogRecord};
/// use tracing::Level;
///
/// let record = LogRecord::new(
///     Level::INFO,
///     Direction::Inbound,
///     vec![Attr::group("response", vec![Attr::int("status", 204)])],
/// );
///
/// assert_eq!(record.message(), "http inbound");
/// assert_eq!(record.get("response.status").and_then(|v| v.as_i64()), Some(204));
/// ```
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: SystemTime,
    pub level: Level,
    pub direction: Direction,
    pub attrs: Vec<Attr>,
}

impl LogRecord {
    pub fn new(level: Level, direction: Direction, attrs: Vec<Attr>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            level,
            direction,
            attrs,
        }
    }

    pub fn message(&self) -> &'static str {
        self.direction.message()
    }

    /// Look up a nested attribute by dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.attrs, path)
    }

    /// The attributes alone, as one line of JSON.
    pub fn attrs_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Attrs(&self.attrs))
    }

    /// The full record, as one line of JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        let mut map = serializer.serialize_map(Some(self.attrs.len() + 3))?;
        map.serialize_entry("time", &millis)?;
        map.serialize_entry("level", self.level.as_str())?;
        map.serialize_entry("msg", self.message())?;
        for attr in &self.attrs {
            map.serialize_entry(&attr.key, &attr.value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::Inbound.message(), "http inbound");
        assert_eq!(Direction::Outbound.message(), "http outbound");
        assert_eq!(Direction::Outbound.error_key(), "sendError");
        assert_eq!(Mode::default(), Mode::Drain);
    }

    #[test]
    fn test_record_json_is_single_line() {
        let record = LogRecord::new(
            Level::DEBUG,
            Direction::Outbound,
            vec![
                Attr::duration("duration", Duration::from_millis(2)),
                Attr::group(
                    "request",
                    vec![Attr::group("body", vec![Attr::string("value", "a\\nb")])],
                ),
            ],
        );

        let line = record.to_json().unwrap();
        assert!(!line.contains('\n'));

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["msg"], "http outbound");
        assert_eq!(parsed["level"], "DEBUG");
        assert_eq!(parsed["duration"], 2_000_000);
        assert_eq!(parsed["request"]["body"]["value"], "a\\nb");

        let attrs: serde_json::Value = serde_json::from_str(&record.attrs_json().unwrap()).unwrap();
        assert!(attrs.get("msg").is_none());
    }
}
