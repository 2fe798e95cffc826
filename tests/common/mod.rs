//! Shared utilities for integration tests: mock backends and a running proxy.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use affinity_proxy::config::{BackendConfig, ProxyConfig};
use affinity_proxy::http::{AppState, HttpServer};
use affinity_proxy::lifecycle::Shutdown;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Heartbeat frame of the endless stream.
pub const HEARTBEAT: &str = "data: {\"msg\":\"heartbeat\"}\n\n";

/// Start a mock backend named `id` on an ephemeral port.
///
/// - `GET /gradio_api/queue/data` streams a completion event whose file `url`
///   points at the host the request was forwarded from
/// - `/slow` answers after three seconds
/// - `/unavailable` answers 503
/// - anything else echoes the request as JSON
pub async fn spawn_backend(id: &str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new()
        .route("/gradio_api/queue/data", get(completion_stream))
        .route("/slow", any(slow))
        .route("/unavailable", any(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .fallback(echo)
        .with_state(Arc::<str>::from(id));

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn echo(State(id): State<Arc<str>>, request: Request<Body>) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "backend": &*id,
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "body": String::from_utf8_lossy(&body),
        "secret": header("x-proxy-secret"),
        "forwarded_for": header("x-forwarded-for"),
        "accept_encoding": header("accept-encoding"),
    }))
}

async fn completion_stream(State(id): State<Arc<str>>, headers: HeaderMap) -> Response {
    let host = headers
        .get("x-forwarded-host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let events = format!(
        concat!(
            "data: {{\"msg\":\"process_generating\"}}\n\n",
            "data: {{\"msg\":\"process_completed\",\"success\":true,\"output\":{{\"data\":[",
            "{{\"name\":\"/tmp/out.wav\",\"path\":\"/tmp/out.wav\",",
            "\"url\":\"http://{}/gradio_api/file=/tmp/out.wav\",\"size\":12}}]}}}}\n\n"
        ),
        host
    );
    // Split inside the completion frame so the proxy has to reassemble it.
    let split = events.find("/tmp/out").unwrap_or(0) + 4;
    let chunks = vec![
        Ok::<_, Infallible>(Bytes::from(events[..split].to_string())),
        Ok(Bytes::from(events[split..].to_string())),
    ];
    (
        [
            (header::CONTENT_TYPE, "text/event-stream".to_string()),
            (header::HeaderName::from_static("x-backend"), id.to_string()),
        ],
        Body::from_stream(futures_util::stream::iter(chunks)),
    )
        .into_response()
}

/// Notifies when dropped, i.e. when the server gave up on the body.
struct DropSignal(Arc<Notify>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Start a backend whose `/gradio_api/stream` never ends; the returned
/// `Notify` fires once the response body is dropped.
pub async fn spawn_endless_backend(id: &str) -> (SocketAddr, Arc<Notify>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dropped = Arc::new(Notify::new());

    let signal = dropped.clone();
    let app = Router::new()
        .route(
            "/gradio_api/stream",
            get(move || {
                let signal = DropSignal(signal.clone());
                async move {
                    let events = futures_util::stream::unfold(signal, |signal| async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Some((Ok::<_, Infallible>(Bytes::from_static(HEARTBEAT.as_bytes())), signal))
                    });
                    (
                        [(header::CONTENT_TYPE, "text/event-stream")],
                        Body::from_stream(events),
                    )
                }
            }),
        )
        .fallback(echo)
        .with_state(Arc::<str>::from(id));

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, dropped)
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(3)).await;
    "late"
}

/// Config with the given backends, round-robin, default routes.
pub fn config_for(backends: &[(&str, SocketAddr)]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backends = backends
        .iter()
        .map(|(name, addr)| BackendConfig {
            name: name.to_string(),
            address: addr.to_string(),
        })
        .collect();
    config
}

/// A proxy running in the background until dropped.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    shutdown: Shutdown,
    server: Option<JoinHandle<()>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Signal shutdown and hand back the server task.
    pub fn shut_down(&mut self) -> JoinHandle<()> {
        self.shutdown.trigger();
        self.server.take().expect("server already taken")
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(config).unwrap();
    let state = server.state().clone();
    let shutdown = Shutdown::new();
    let (updates, rx) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();

    let server = tokio::spawn(async move {
        let _ = server.run(listener, rx, server_shutdown).await;
    });

    TestProxy {
        addr,
        state,
        updates,
        shutdown,
        server: Some(server),
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Backend that answered an echoed request.
pub async fn served_by(response: reqwest::Response) -> String {
    let json: Value = response.json().await.unwrap();
    json["backend"].as_str().unwrap().to_string()
}
