//! Composite handler for fanning records out to several backends.
//!
//! # Example
//!
//! ```rust
//! use httplog::{LoggingHandler, MultiHandler};
//!
//! let handler = MultiHandler::new().with(LoggingHandler);
//! assert_eq!(handler.len(), 1);
//! ```

use crate::types::LogRecord;
use crate::RecordHandler;
use std::sync::Arc;
use tracing::Level;

/// A handler that delegates every record to each of its inner handlers, in order.
///
/// A record is built once and cloned per handler. Handlers that report the record's level
/// as disabled are skipped.
#[derive(Clone, Default)]
pub struct MultiHandler {
    handlers: Vec<Arc<dyn RecordHandler>>,
}

impl MultiHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with<H: RecordHandler>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

impl RecordHandler for MultiHandler {
    /// Enabled when any inner handler is.
    fn enabled(&self, level: Level) -> bool {
        self.handlers.iter().any(|h| h.enabled(level))
    }

    fn handle_record(&self, record: LogRecord) {
        let mut targets = self
            .handlers
            .iter()
            .filter(|h| h.enabled(record.level))
            .peekable();

        while let Some(handler) = targets.next() {
            if targets.peek().is_none() {
                handler.handle_record(record);
                return;
            }
            handler.handle_record(record.clone());
        }
    }
}

impl std::fmt::Debug for MultiHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHandler")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
