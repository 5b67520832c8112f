use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use httplog::{
    HttpLogger, HttpLoggerConfig, LogPolicy, LogRecord, LoggingHandler, Mode, MultiHandler,
    RecordHandler,
};
use serde_json::Value;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const KEEP_RECORDS: usize = 50;

/// Keeps the most recent records in memory so they can be inspected over HTTP
#[derive(Debug, Clone, Default)]
struct RecentRecords {
    records: Arc<Mutex<VecDeque<Value>>>,
}

impl RecentRecords {
    fn snapshot(&self) -> Vec<Value> {
        self.records.lock().unwrap().iter().cloned().collect()
    }
}

impl RecordHandler for RecentRecords {
    fn handle_record(&self, record: LogRecord) {
        let Ok(value) = serde_json::to_value(&record) else {
            return;
        };
        let mut records = self.records.lock().unwrap();
        if records.len() == KEEP_RECORDS {
            records.pop_front();
        }
        records.push_back(value);
    }
}

async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn echo_handler(Json(body): Json<Value>) -> impl IntoResponse {
    sleep(Duration::from_millis(50)).await;
    Json(body)
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("<p>chunk-{count}</p>"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/html")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn large_response_handler() -> impl IntoResponse {
    // larger than the body log limit below, so the record shows truncation
    Json(Value::String("x".repeat(2048)))
}

async fn stats_handler(State(recent): State<RecentRecords>) -> impl IntoResponse {
    Json(recent.snapshot())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("httplog=debug".parse()?))
        .init();

    info!("Starting http logging demo server");

    let recent = RecentRecords::default();
    let logger = HttpLogger::new(
        HttpLoggerConfig {
            level: Level::INFO,
            mode: Mode::Tee,
            policy: LogPolicy::default().mask_headers(httplog::policy::HeaderNames::new([
                "authorization",
                "cookie",
            ])),
            max_body_log_bytes: 512,
            ..Default::default()
        },
        MultiHandler::new().with(LoggingHandler).with(recent.clone()),
    );

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler))
        .route("/large", get(large_response_handler))
        .route("/stats", get(stats_handler))
        .with_state(recent)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(logger.inbound_layer())
                .into_inner(),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /echo       - Echo a JSON body");
    info!("  GET  /streaming  - Streaming HTML response");
    info!("  GET  /large      - Large response (truncated in the record)");
    info!("  GET  /stats      - Recent http log records");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!("  curl -X POST -H 'content-type: application/json' -d '{{\"a\":1}}' http://localhost:3000/echo");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/stats");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
