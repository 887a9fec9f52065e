//! Integration tests for the HTTP event source.
//!
//! Uses a mock hyper HTTP server to emit event-stream bodies, verifying the
//! request → validate → decode pipeline and one end-to-end manager run.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::StreamExt;
use http_body_util::Full;
use hyper::{
    Request, Response,
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use rtdb_stream::{
    EventSource, HttpEventSource, ListenerOptions, ManagerConfig, SourceEvent, StreamError,
    StreamEvent, StreamManager,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Mock server helpers
// ---------------------------------------------------------------------------

/// What the server saw: request path and `Accept` header.
type Seen = Arc<Mutex<Vec<(String, Option<String>)>>>;

/// Start a mock server answering every request with the given body, content
/// type and status code.
async fn start_server(
    body: &'static str,
    content_type: &'static str,
    status: u16,
) -> (SocketAddr, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let seen: Seen = Arc::default();
    let log = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let _ = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req: Request<Incoming>| {
                            let accept = req
                                .headers()
                                .get("accept")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            log.lock()
                                .unwrap()
                                .push((req.uri().path().to_string(), accept));
                            let resp = Response::builder()
                                .status(status)
                                .header("content-type", content_type)
                                .body(Full::new(Bytes::from(body)))
                                .expect("build response");
                            async move { Ok::<_, Infallible>(resp) }
                        }),
                    )
                    .await;
            });
        }
    });

    (addr, seen)
}

async fn collect(source: &HttpEventSource, url: &str) -> Vec<SourceEvent> {
    let headers = rtdb_stream::StreamConfig::new("test", url).request_headers();
    timeout(TEST_TIMEOUT, source.open(url, &headers).collect::<Vec<_>>())
        .await
        .expect("stream should finish")
}

// ---------------------------------------------------------------------------
// Event source
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_open_frames_then_closed() {
    let body = concat!(
        ": comment\n",
        "event: put\n",
        "data: {\"path\":\"/\",\"data\":{\"status\":\"pending\"}}\n\n",
        "event: keep-alive\r\n",
        "data: null\r\n\r\n",
    );
    let (addr, seen) = start_server(body, "text/event-stream", 200).await;
    let source = HttpEventSource::new().expect("client");

    let events = collect(&source, &format!("http://{addr}/public/x.json")).await;

    assert_eq!(events.len(), 4, "got {events:?}");
    assert!(matches!(events[0], SourceEvent::Open));
    match &events[1] {
        SourceEvent::Frame(frame) => {
            assert_eq!(frame.event, "put");
            assert_eq!(frame.data, r#"{"path":"/","data":{"status":"pending"}}"#);
        }
        other => panic!("expected frame, got {other:?}"),
    }
    match &events[2] {
        SourceEvent::Frame(frame) => {
            assert_eq!(frame.event, "keep-alive");
            assert_eq!(frame.data, "null");
        }
        other => panic!("expected frame, got {other:?}"),
    }
    assert!(matches!(events[3], SourceEvent::Closed));

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "/public/x.json");
    assert_eq!(seen[0].1.as_deref(), Some("text/event-stream"));
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let (addr, _) = start_server("denied", "text/plain", 403).await;
    let source = HttpEventSource::new().expect("client");

    let events = collect(&source, &format!("http://{addr}/x.json")).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SourceEvent::Error(StreamError::InvalidStatus { status }) if status.as_u16() == 403
    ));
}

#[tokio::test]
async fn test_wrong_content_type_is_an_error() {
    let (addr, _) = start_server("{}", "application/json", 200).await;
    let source = HttpEventSource::new().expect("client");

    let events = collect(&source, &format!("http://{addr}/x.json")).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SourceEvent::Error(StreamError::InvalidContentType { content_type })
            if content_type == "application/json"
    ));
}

#[tokio::test]
async fn test_unreachable_host_is_an_error() {
    // Bind then drop to get a port with nothing listening.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr")
    };
    let source = HttpEventSource::new().expect("client");

    let events = collect(&source, &format!("http://{addr}/x.json")).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        SourceEvent::Error(err) => assert!(err.is_transport(), "got {err}"),
        other => panic!("expected error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_manager_delivers_events_over_http() {
    let body = concat!(
        "event: put\n",
        "data: {\"path\":\"/\",\"data\":null}\n\n",
        "event: patch\n",
        "data: {\"path\":\"/status\",\"data\":\"completed\"}\n\n",
    );
    let (addr, seen) = start_server(body, "text/event-stream; charset=utf-8", 200).await;
    let manager = StreamManager::with_http(ManagerConfig::new(format!("http://{addr}")))
        .expect("manager");

    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<StreamEvent>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    let options = ListenerOptions::new(move |event| {
        let _ = data_tx.send(event);
    })
    .on_max_retries_reached(move |id| {
        let _ = done_tx.send(id.to_string());
    })
    .max_retries(0);

    manager
        .listen_to_payment_events("tx1", options)
        .await
        .expect("listen");

    let event = timeout(TEST_TIMEOUT, data_rx.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert_eq!(event.stream_id, "payment");
    assert_eq!(event.path, "/status");
    assert_eq!(event.data, json!("completed"));

    // The body ends, the server close is retried zero times, the session
    // gives up and removes itself.
    let id = timeout(TEST_TIMEOUT, done_rx.recv())
        .await
        .expect("exhaustion in time")
        .expect("stream id");
    assert_eq!(id, "payment");
    assert!(manager.active_stream_ids().is_empty());
    assert!(data_rx.try_recv().is_err(), "null payload must be dropped");

    assert_eq!(seen.lock().unwrap()[0].0, "/public/paymentUpdate/tx1.json");
}
