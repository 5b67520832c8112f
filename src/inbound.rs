//! Inbound logging for sink-style handlers.
//!
//! A [`Handler`] serves a request by writing into a [`ResponseSink`]. [`LoggedHandler`]
//! wraps one, decorating the sink with [`wrap_with_buffer`] so the status, byte count and
//! written body are observed without hiding any of the sink's capabilities.

use crate::attr::Attr;
use crate::body::BoxBody;
use crate::logger::{BodySlot, HttpLogger};
use crate::tee::TeeReader;
use crate::types::{Direction, Mode};
use crate::writer::{wrap_with_buffer, ResponseSink};
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Instant;

/// Serves one request by writing a response into a sink.
pub trait Handler: Send + Sync {
    fn serve(&self, sink: &mut dyn ResponseSink, request: Request<BoxBody>);
}

impl<F> Handler for F
where
    F: Fn(&mut dyn ResponseSink, Request<BoxBody>) + Send + Sync,
{
    fn serve(&self, sink: &mut dyn ResponseSink, request: Request<BoxBody>) {
        self(sink, request)
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn serve(&self, sink: &mut dyn ResponseSink, request: Request<BoxBody>) {
        (**self).serve(sink, request)
    }
}

impl HttpLogger {
    /// Wrap `next` so every request it serves produces one `http inbound` record.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use httplog::body::BoxBody;
    /// use httplog::writer::ResponseSink;
    /// use httplog::{HttpLogger, HttpLoggerConfig, LoggingHandler};
    /// use axum::http::{Request, StatusCode};
    ///
    /// let logger = HttpLogger::new(HttpLoggerConfig::default(), LoggingHandler);
    /// let handler = logger.handler(|sink: &mut dyn ResponseSink, _req: Request<BoxBody>| {
    ///     sink.write_head(StatusCode::NO_CONTENT);
    /// });
    /// # let _ = handler;
    /// ```
    pub fn handler<H: Handler>(&self, next: H) -> LoggedHandler<H> {
        LoggedHandler {
            logger: self.clone(),
            next,
        }
    }
}

/// A handler decorated with inbound logging.
#[derive(Debug, Clone)]
pub struct LoggedHandler<H> {
    logger: HttpLogger,
    next: H,
}

impl<H: Handler> LoggedHandler<H> {
    fn serve_drain(&self, sink: &mut dyn ResponseSink, request: Request<BoxBody>) {
        let converter = self.logger.converter();
        let (parts, body) = request.into_parts();

        let mut request_attrs = converter.request_attrs(&parts);
        let (body, body_attrs) = converter.drain_request_body(&parts, body);
        request_attrs.extend(body_attrs);

        self.serve_and_emit(sink, Request::from_parts(parts, body), || request_attrs);
    }

    fn serve_tee(&self, sink: &mut dyn ResponseSink, request: Request<BoxBody>) {
        let converter = self.logger.converter();
        let (parts, body) = request.into_parts();

        let mut request_attrs = converter.request_attrs(&parts);
        let slot = BodySlot::default();

        let body = match converter.request_body_skip(&parts, !body.is_empty_body()) {
            Some(note) => {
                request_attrs.push(note);
                body
            }
            None => {
                TeeReader::pooled(body, self.logger.pool(), self.logger.capture_into(&slot))
                    .boxed()
            }
        };

        self.serve_and_emit(sink, Request::from_parts(parts, body), move || {
            request_attrs.extend(slot.take());
            request_attrs
        });
    }

    /// Runs the handler against a wrapped sink, then emits the record. The request body is
    /// owned by the handler and has been dropped by the time `request_attrs` runs.
    fn serve_and_emit(
        &self,
        sink: &mut dyn ResponseSink,
        request: Request<BoxBody>,
        request_attrs: impl FnOnce() -> Vec<Attr>,
    ) {
        let converter = self.logger.converter();
        let mut wrapped = wrap_with_buffer(sink, self.logger.pool().get());

        let start = Instant::now();
        self.next.serve(&mut wrapped, request);
        let duration = start.elapsed();

        let response = converter.response_writer(
            wrapped.headers(),
            wrapped.status().unwrap_or(StatusCode::OK),
            wrapped.bytes_written(),
            wrapped.buffer(),
        );

        self.logger.emit(
            Direction::Inbound,
            vec![
                Attr::duration("duration", duration),
                converter.request_group(request_attrs()),
                response,
            ],
        );
    }
}

impl<H: Handler> Handler for LoggedHandler<H> {
    fn serve(&self, sink: &mut dyn ResponseSink, request: Request<BoxBody>) {
        if !self.logger.enabled() {
            return self.next.serve(sink, request);
        }

        match self.logger.mode() {
            Mode::Drain => self.serve_drain(sink, request),
            Mode::Tee => self.serve_tee(sink, request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Value;
    use crate::body::BytesBody;
    use crate::types::LogRecord;
    use crate::pool::PooledBuffer;
    use crate::writer::{Composite, Hijack, Hijacked};
    use crate::{HttpLoggerConfig, RecordHandler};
    use axum::http::{header, HeaderMap, HeaderValue};
    use bytes::Bytes;
    use std::io::{self, Read};
    use std::sync::Mutex;
    use tracing::Level;

    #[derive(Clone, Default)]
    struct Records(Arc<Mutex<Vec<LogRecord>>>);

    impl RecordHandler for Records {
        fn handle_record(&self, record: LogRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    impl Records {
        fn single(&self) -> LogRecord {
            let records = self.0.lock().unwrap();
            assert_eq!(records.len(), 1, "expected exactly one record");
            records[0].clone()
        }
    }

    #[derive(Default)]
    struct TestSink {
        headers: HeaderMap,
        status: Option<StatusCode>,
        body: Vec<u8>,
        hijackable: bool,
    }

    impl ResponseSink for TestSink {
        fn headers(&self) -> &HeaderMap {
            &self.headers
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_head(&mut self, status: StatusCode) {
            self.status = Some(status);
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.body.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn as_hijacker(&mut self) -> Option<&mut dyn Hijack> {
            if self.hijackable {
                Some(self)
            } else {
                None
            }
        }
    }

    impl Hijack for TestSink {
        fn hijack(&mut self) -> io::Result<Hijacked> {
            Ok(Hijacked {
                conn: Box::new(io::Cursor::new(Vec::new())),
                buffered: Bytes::new(),
            })
        }
    }

    fn json_request(body: &'static str) -> Request<BoxBody> {
        Request::builder()
            .method("GET")
            .uri("/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(BytesBody::new(body).boxed())
            .unwrap()
    }

    fn json_reply(sink: &mut dyn ResponseSink, mut request: Request<BoxBody>) {
        let mut seen = String::new();
        request.body_mut().read_to_string(&mut seen).unwrap();
        assert_eq!(seen, "\"request body\"");

        sink.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        sink.write_head(StatusCode::OK);
        sink.write(b"\"response body\"").unwrap();
    }

    fn logger(mode: Mode, records: &Records) -> HttpLogger {
        HttpLogger::new(
            HttpLoggerConfig {
                mode,
                ..Default::default()
            },
            records.clone(),
        )
    }

    fn assert_json_exchange(record: &LogRecord) {
        assert_eq!(record.message(), "http inbound");
        assert_eq!(
            record.get("request.body.value").and_then(Value::as_str),
            Some("\\\"request body\\\"")
        );
        assert_eq!(
            record.get("response.body.value").and_then(Value::as_str),
            Some("\\\"response body\\\"")
        );
        assert_eq!(
            record.get("response.status.code").and_then(Value::as_i64),
            Some(200)
        );
        assert_eq!(
            record.get("response.bytesWritten").and_then(Value::as_u64),
            Some(15)
        );
        assert!(record.get("duration").is_some());
    }

    #[test]
    fn test_drain_mode_json_exchange() {
        let records = Records::default();
        let handler = logger(Mode::Drain, &records).handler(json_reply);

        let mut sink = TestSink::default();
        handler.serve(&mut sink, json_request("\"request body\""));

        assert_eq!(sink.body, b"\"response body\"");
        assert_eq!(sink.status, Some(StatusCode::OK));
        assert_json_exchange(&records.single());
    }

    #[test]
    fn test_tee_mode_json_exchange() {
        let records = Records::default();
        let handler = logger(Mode::Tee, &records).handler(json_reply);

        let mut sink = TestSink::default();
        handler.serve(&mut sink, json_request("\"request body\""));

        assert_json_exchange(&records.single());
    }

    #[test]
    fn test_tee_mode_logs_only_what_was_read() {
        let records = Records::default();
        let handler = logger(Mode::Tee, &records).handler(
            |sink: &mut dyn ResponseSink, mut request: Request<BoxBody>| {
                let mut first = [0u8; 4];
                request.body_mut().read_exact(&mut first).unwrap();
                sink.write_head(StatusCode::ACCEPTED);
            },
        );

        let mut sink = TestSink::default();
        handler.serve(&mut sink, json_request("{\"items\":[1,2,3]}"));

        let record = records.single();
        assert_eq!(
            record.get("request.body.value").and_then(Value::as_str),
            Some("{\\\"it")
        );
        assert_eq!(
            record.get("response.status.code").and_then(Value::as_i64),
            Some(202)
        );
    }

    #[test]
    fn test_unlogable_and_empty_bodies_get_notes() {
        let records = Records::default();
        let handler = logger(Mode::Drain, &records).handler(
            |sink: &mut dyn ResponseSink, _request: Request<BoxBody>| {
                sink.write(b"ok").unwrap();
            },
        );

        let request = Request::builder()
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(BytesBody::new(vec![0u8, 1, 2]).boxed())
            .unwrap();
        handler.serve(&mut TestSink::default(), request);

        let record = records.single();
        assert_eq!(
            record.get("request.bodyLogNote").and_then(Value::as_str),
            Some("body is not logable")
        );
        assert!(record.get("response.body").is_none());
        assert_eq!(
            record.get("response.status.code").and_then(Value::as_i64),
            Some(200)
        );

        let records = Records::default();
        let handler = logger(Mode::Tee, &records).handler(
            |_sink: &mut dyn ResponseSink, _request: Request<BoxBody>| {},
        );
        let request = Request::builder().body(BytesBody::empty().boxed()).unwrap();
        handler.serve(&mut TestSink::default(), request);
        assert_eq!(
            records.single().get("request.bodyLogNote").and_then(Value::as_str),
            Some("no body")
        );
    }

    #[test]
    fn test_handler_sees_sink_capabilities() {
        let records = Records::default();
        let handler = logger(Mode::Drain, &records).handler(
            |sink: &mut dyn ResponseSink, _request: Request<BoxBody>| {
                assert!(sink.as_flusher().is_none());
                let hijacker = sink.as_hijacker().expect("hijack preserved");
                hijacker.hijack().unwrap();
            },
        );

        let mut sink = TestSink {
            hijackable: true,
            ..Default::default()
        };
        handler.serve(&mut sink, json_request("\"x\""));
        assert_eq!(records.0.lock().unwrap().len(), 1);

        let mut plain = TestSink::default();
        let probe: &mut dyn ResponseSink = &mut plain;
        assert_eq!(wrap_with_buffer(probe, PooledBuffer::detached()).composite(), Composite::Plain);
    }

    #[test]
    fn test_disabled_logger_passes_through() {
        let records = Records::default();
        let config = HttpLoggerConfig {
            level: Level::TRACE,
            ..Default::default()
        };

        struct Quiet(Records);
        impl RecordHandler for Quiet {
            fn enabled(&self, level: Level) -> bool {
                level <= Level::INFO
            }
            fn handle_record(&self, record: LogRecord) {
                self.0.handle_record(record)
            }
        }

        let handler = HttpLogger::new(config, Quiet(records.clone())).handler(json_reply);
        let mut sink = TestSink::default();
        handler.serve(&mut sink, json_request("\"request body\""));

        assert_eq!(sink.body, b"\"response body\"");
        assert!(records.0.lock().unwrap().is_empty());
    }
}
