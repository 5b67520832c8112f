//! Outbound logging for blocking client transports.

use crate::attr::Attr;
use crate::body::BoxBody;
use crate::error::{BoxError, CaptureError};
use crate::logger::{BodySlot, HttpLogger};
use crate::tee::TeeReader;
use crate::types::{Direction, Mode};
use axum::http::{Request, Response};
use std::sync::Arc;
use std::time::Instant;

/// Performs one HTTP exchange.
pub trait RoundTrip: Send + Sync {
    fn round_trip(&self, request: Request<BoxBody>) -> Result<Response<BoxBody>, BoxError>;
}

impl<F> RoundTrip for F
where
    F: Fn(Request<BoxBody>) -> Result<Response<BoxBody>, BoxError> + Send + Sync,
{
    fn round_trip(&self, request: Request<BoxBody>) -> Result<Response<BoxBody>, BoxError> {
        self(request)
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for Arc<T> {
    fn round_trip(&self, request: Request<BoxBody>) -> Result<Response<BoxBody>, BoxError> {
        (**self).round_trip(request)
    }
}

impl HttpLogger {
    /// Wrap `next` so every call produces one `http outbound` record.
    ///
    /// Transport errors are logged as `sendError` and returned unchanged. In [`Mode::Tee`]
    /// the record is emitted once the caller closes or drops the response body.
    pub fn round_tripper<T: RoundTrip>(&self, next: T) -> LoggedTransport<T> {
        LoggedTransport {
            logger: self.clone(),
            next,
        }
    }
}

/// A transport decorated with outbound logging.
#[derive(Debug, Clone)]
pub struct LoggedTransport<T> {
    logger: HttpLogger,
    next: T,
}

impl<T: RoundTrip> LoggedTransport<T> {
    fn round_trip_drain(&self, request: Request<BoxBody>) -> Result<Response<BoxBody>, BoxError> {
        let converter = self.logger.converter();
        let (parts, body) = request.into_parts();

        let mut request_attrs = converter.request_attrs(&parts);
        let (body, body_attrs) = converter.drain_request_body(&parts, body);
        request_attrs.extend(body_attrs);

        let start = Instant::now();
        let result = self.next.round_trip(Request::from_parts(parts, body));

        let mut attrs = vec![
            Attr::duration("duration", start.elapsed()),
            converter.request_group(request_attrs),
        ];

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                attrs.push(converter.error(Direction::Outbound.error_key(), &err));
                self.logger.emit(Direction::Outbound, attrs);
                return Err(err);
            }
        };

        let (parts, body) = response.into_parts();
        let mut response_attrs = converter.response_attrs(&parts);
        let (body, body_attrs) = converter.drain_response_body(&parts, body);
        response_attrs.extend(body_attrs);

        attrs.push(converter.response_group(response_attrs));
        self.logger.emit(Direction::Outbound, attrs);

        Ok(Response::from_parts(parts, body))
    }

    fn round_trip_tee(&self, request: Request<BoxBody>) -> Result<Response<BoxBody>, BoxError> {
        let converter = self.logger.converter();
        let (parts, body) = request.into_parts();

        let mut request_attrs = converter.request_attrs(&parts);
        let request_slot = BodySlot::default();

        let body = match converter.request_body_skip(&parts, !body.is_empty_body()) {
            Some(note) => {
                request_attrs.push(note);
                body
            }
            None => TeeReader::pooled(
                body,
                self.logger.pool(),
                self.logger.capture_into(&request_slot),
            )
            .boxed(),
        };

        let start = Instant::now();
        let result = self.next.round_trip(Request::from_parts(parts, body));
        let duration = start.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                request_attrs.extend(request_slot.take());
                self.logger.emit(
                    Direction::Outbound,
                    vec![
                        Attr::duration("duration", duration),
                        converter.request_group(request_attrs),
                        converter.error(Direction::Outbound.error_key(), &err),
                    ],
                );
                return Err(err);
            }
        };

        let (parts, body) = response.into_parts();
        let mut response_attrs = converter.response_attrs(&parts);

        let emit = {
            let logger = self.logger.clone();
            move |response_body: Vec<Attr>| {
                let converter = logger.converter();
                request_attrs.extend(request_slot.take());
                response_attrs.extend(response_body);
                logger.emit(
                    Direction::Outbound,
                    vec![
                        Attr::duration("duration", duration),
                        converter.request_group(request_attrs),
                        converter.response_group(response_attrs),
                    ],
                );
            }
        };

        let body = match converter.response_body_skip(&parts, !body.is_empty_body()) {
            Some(note) => {
                emit(vec![note]);
                body
            }
            None => {
                let converter = converter.clone();
                TeeReader::pooled(
                    body,
                    self.logger.pool(),
                    move |read_err: Option<CaptureError>,
                          close_err: Option<CaptureError>,
                          bytes: &[u8]| {
                        emit(converter.captured_body_attrs(
                            read_err.as_ref(),
                            close_err.as_ref(),
                            bytes,
                        ))
                    },
                )
                .boxed()
            }
        };

        Ok(Response::from_parts(parts, body))
    }
}

impl<T: RoundTrip> RoundTrip for LoggedTransport<T> {
    fn round_trip(&self, request: Request<BoxBody>) -> Result<Response<BoxBody>, BoxError> {
        if !self.logger.enabled() {
            return self.next.round_trip(request);
        }

        match self.logger.mode() {
            Mode::Drain => self.round_trip_drain(request),
            Mode::Tee => self.round_trip_tee(request),
        }
    }
}
