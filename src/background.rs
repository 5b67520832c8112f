//! Hand records to an async consumer on a background task.
//!
//! Records are produced synchronously, from inside request handling and from body drop
//! paths. Backends that need to await (a database write, an HTTP exporter) implement
//! [`AsyncRecordHandler`] and are driven by [`BackgroundHandler`], which queues records on
//! an unbounded channel and processes them in order on a spawned task.

use crate::types::LogRecord;
use crate::RecordHandler;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, Level};

/// An async record consumer.
///
/// # Examples
///
/// ```rust
/// use httplog::background::AsyncRecordHandler;
/// use httplog::types::LogRecord;
///
/// struct Exporter;
///
/// impl AsyncRecordHandler for Exporter {
///     async fn handle_record(&self, record: LogRecord) {
///         let _line = record.to_json();
///     }
/// }
/// ```
pub trait AsyncRecordHandler: Send + Sync + 'static {
    fn handle_record(&self, record: LogRecord) -> impl Future<Output = ()> + Send;
}

/// A [`RecordHandler`] that forwards records to an [`AsyncRecordHandler`] running on a
/// background task.
#[derive(Clone, Debug)]
pub struct BackgroundHandler {
    tx: mpsc::UnboundedSender<LogRecord>,
    min_level: Level,
}

impl BackgroundHandler {
    /// Spawn the background task. Must be called from within a Tokio runtime.
    pub fn spawn<H: AsyncRecordHandler>(handler: H) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                handler.handle_record(record).await;
            }
        });

        Self {
            tx,
            min_level: Level::TRACE,
        }
    }

    /// Only accept records at `level` or more severe.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl RecordHandler for BackgroundHandler {
    fn enabled(&self, level: Level) -> bool {
        level <= self.min_level && !self.tx.is_closed()
    }

    fn handle_record(&self, record: LogRecord) {
        if self.tx.send(record).is_err() {
            error!("Failed to send http log record to background task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Attr;
    use crate::types::Direction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Collector {
        seen: mpsc::UnboundedSender<String>,
        count: Arc<AtomicUsize>,
    }

    impl AsyncRecordHandler for Collector {
        async fn handle_record(&self, record: LogRecord) {
            tokio::task::yield_now().await;
            self.count.fetch_add(1, Ordering::SeqCst);
            let _ = self.seen.send(record.message().to_owned());
        }
    }

    #[tokio::test]
    async fn test_records_are_processed_in_order() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = BackgroundHandler::spawn(Collector {
            seen: seen_tx,
            count: count.clone(),
        });

        handler.handle_record(LogRecord::new(Level::INFO, Direction::Inbound, vec![]));
        handler.handle_record(LogRecord::new(
            Level::INFO,
            Direction::Outbound,
            vec![Attr::bool("retried", false)],
        ));

        let first = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .unwrap();

        assert_eq!(first.as_deref(), Some("http inbound"));
        assert_eq!(second.as_deref(), Some("http outbound"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_min_level_filters() {
        let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
        let handler = BackgroundHandler::spawn(Collector {
            seen: seen_tx,
            count: Arc::new(AtomicUsize::new(0)),
        })
        .with_min_level(Level::INFO);

        assert!(handler.enabled(Level::WARN));
        assert!(!handler.enabled(Level::DEBUG));
    }
}
