//! Default record backend built on `tracing`.
//!
//! [`LoggingHandler`] turns every [`LogRecord`] into a single `tracing` event at the
//! record's level, with the attribute tree attached as one line of JSON. Any subscriber
//! (plain text, JSON, OpenTelemetry bridge) can then persist it.

use tracing::{enabled, event, warn, Level};

use crate::types::LogRecord;
use crate::RecordHandler;

// `tracing` needs the level as a constant at each call site
macro_rules! at_level {
    ($level:expr, $mac:ident!()) => {
        match $level {
            Level::ERROR => $mac!(Level::ERROR),
            Level::WARN => $mac!(Level::WARN),
            Level::INFO => $mac!(Level::INFO),
            Level::DEBUG => $mac!(Level::DEBUG),
            _ => $mac!(Level::TRACE),
        }
    };
    ($level:expr, $mac:ident!($($args:tt)*)) => {
        match $level {
            Level::ERROR => $mac!(Level::ERROR, $($args)*),
            Level::WARN => $mac!(Level::WARN, $($args)*),
            Level::INFO => $mac!(Level::INFO, $($args)*),
            Level::DEBUG => $mac!(Level::DEBUG, $($args)*),
            _ => $mac!(Level::TRACE, $($args)*),
        }
    };
}

/// Emits records as `tracing` events.
///
/// The event carries the record message (`http inbound` / `http outbound`) and a `record`
/// field holding the attributes as JSON. Records whose level is disabled for the current
/// subscriber are reported as disabled through [`RecordHandler::enabled`], so the logger
/// skips building them entirely.
///
/// # Examples
///
/// ```rust
/// use httplog::{HttpLogger, HttpLoggerConfig, LoggingHandler};
///
/// let logger = HttpLogger::new(HttpLoggerConfig::default(), LoggingHandler);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler;

impl RecordHandler for LoggingHandler {
    fn enabled(&self, level: Level) -> bool {
        at_level!(level, enabled!())
    }

    fn handle_record(&self, record: LogRecord) {
        let json = match record.attrs_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, direction = ?record.direction, "Failed to encode http log record");
                return;
            }
        };

        let message = record.message();
        at_level!(record.level, event!(record = %json, "{}", message));
    }
}
