//! The configured logger shared by every integration point.

use crate::attr::{Attr, AttrConverter};
use crate::error::CaptureError;
use crate::pool::BufferPool;
use crate::types::{Direction, LogRecord, Mode};
use crate::{HttpLoggerConfig, RecordHandler};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, Level};

/// Produces one record per HTTP transaction.
///
/// An `HttpLogger` is cheap to clone; all clones share the same buffer pool and backend.
/// Wrap handlers with [`HttpLogger::handler`], transports with [`HttpLogger::round_tripper`],
/// and tower services with [`HttpLogger::inbound_layer`] / [`HttpLogger::outbound_layer`].
///
/// # Examples
///
/// ```rust
/// use httplog::{HttpLogger, HttpLoggerConfig, LoggingHandler, Mode};
/// use tracing::Level;
///
/// let logger = HttpLogger::new(
///     HttpLoggerConfig {
///         level: Level::INFO,
///         mode: Mode::Tee,
///         ..Default::default()
///     },
///     LoggingHandler,
/// );
/// assert_eq!(logger.mode(), Mode::Tee);
/// ```
#[derive(Clone)]
pub struct HttpLogger {
    level: Level,
    mode: Mode,
    converter: AttrConverter,
    pool: BufferPool,
    handler: Arc<dyn RecordHandler>,
}

impl HttpLogger {
    pub fn new<H: RecordHandler>(config: HttpLoggerConfig, handler: H) -> Self {
        Self {
            level: config.level,
            mode: config.mode,
            converter: AttrConverter::new(config.policy, config.max_body_log_bytes),
            pool: BufferPool::new(config.buffer_capacity),
            handler: Arc::new(handler),
        }
    }

    /// Share an existing buffer pool instead of creating a private one.
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn converter(&self) -> &AttrConverter {
        &self.converter
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Whether records at the configured level would be kept. When not, callers skip all
    /// capture work.
    pub fn enabled(&self) -> bool {
        self.handler.enabled(self.level)
    }

    /// Build and hand off a record.
    pub fn emit(&self, direction: Direction, attrs: Vec<Attr>) {
        self.handler
            .handle_record(LogRecord::new(self.level, direction, attrs));
    }

    /// A tee callback that stores the captured body's attributes into `slot`.
    pub(crate) fn capture_into(
        &self,
        slot: &BodySlot,
    ) -> impl FnOnce(Option<CaptureError>, Option<CaptureError>, &[u8]) + Send + 'static {
        let converter = self.converter.clone();
        let slot = slot.clone();
        move |read_err: Option<CaptureError>, close_err: Option<CaptureError>, bytes: &[u8]| {
            slot.fill(converter.captured_body_attrs(read_err.as_ref(), close_err.as_ref(), bytes));
        }
    }
}

impl fmt::Debug for HttpLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLogger")
            .field("level", &self.level)
            .field("mode", &self.mode)
            .field("converter", &self.converter)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Body attributes handed over by a tee callback.
#[derive(Clone, Default)]
pub(crate) struct BodySlot(Arc<Mutex<Option<Vec<Attr>>>>);

impl BodySlot {
    pub(crate) fn fill(&self, attrs: Vec<Attr>) {
        *lock(&self.0) = Some(attrs);
    }

    /// The delivered attributes, or nothing if the body is still open.
    pub(crate) fn take(&self) -> Vec<Attr> {
        match lock(&self.0).take() {
            Some(attrs) => attrs,
            None => {
                debug!("Request body still open when the record was built");
                Vec::new()
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Value;
    use crate::body::BytesBody;
    use crate::tee::TeeReader;
    use std::io::Read;

    #[derive(Default)]
    struct Recorder {
        records: Mutex<Vec<LogRecord>>,
    }

    impl RecordHandler for Arc<Recorder> {
        fn enabled(&self, level: Level) -> bool {
            level <= Level::DEBUG
        }

        fn handle_record(&self, record: LogRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    #[test]
    fn test_defaults() {
        let logger = HttpLogger::new(HttpLoggerConfig::default(), Arc::new(Recorder::default()));
        assert_eq!(logger.level(), Level::DEBUG);
        assert_eq!(logger.mode(), Mode::Drain);
        assert_eq!(logger.pool().default_capacity(), 1024);
        assert!(logger.enabled());
    }

    #[test]
    fn test_level_below_backend_is_disabled() {
        let config = HttpLoggerConfig {
            level: Level::TRACE,
            ..Default::default()
        };
        let logger = HttpLogger::new(config, Arc::new(Recorder::default()));
        assert!(!logger.enabled());
    }

    #[test]
    fn test_emit_hands_record_to_backend() {
        let recorder = Arc::new(Recorder::default());
        let logger = HttpLogger::new(HttpLoggerConfig::default(), recorder.clone());

        logger.emit(Direction::Outbound, vec![Attr::string("sendError", "refused")]);

        let records = recorder.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "http outbound");
        assert_eq!(records[0].level, Level::DEBUG);
    }

    #[test]
    fn test_capture_into_fills_slot_once_body_closes() {
        let logger = HttpLogger::new(HttpLoggerConfig::default(), Arc::new(Recorder::default()));
        let slot = BodySlot::default();

        let mut tee = TeeReader::pooled(BytesBody::new("abc"), logger.pool(), logger.capture_into(&slot));
        let mut out = String::new();
        tee.read_to_string(&mut out).unwrap();
        assert!(slot.take().is_empty());

        drop(tee);
        let attrs = slot.take();
        assert_eq!(
            crate::attr::lookup(&attrs, "body.value").and_then(Value::as_str),
            Some("abc")
        );
    }
}
