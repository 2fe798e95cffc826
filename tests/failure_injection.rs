//! Failure injection: dead, slow and failing backends.

use std::time::Duration;

use serde_json::{json, Value};

mod common;
use common::{
    client, config_for, dead_address, served_by, spawn_backend, spawn_endless_backend, start_proxy,
    HEARTBEAT,
};

#[tokio::test]
async fn test_dead_backend_is_bad_gateway_and_session_reassigned() {
    let dead = dead_address().await;
    let live = spawn_backend("live").await;
    let proxy = start_proxy(config_for(&[("dead", dead), ("live", live)])).await;
    let client = client();
    let url = proxy.url("/gradio_api/queue/status?session_hash=s-1");

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(res.headers()["retry-after"], "5");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["retryable"], true);
    assert!(proxy.state.affinity().lookup("s-1").is_none());

    // The retry is a fresh session and lands on the next backend.
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(served_by(res).await, "live");
    assert_eq!(proxy.state.affinity().lookup("s-1").as_deref(), Some("live"));
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let slow = spawn_backend("slow").await;
    let mut config = config_for(&[("slow", slow)]);
    config.routes = vec![affinity_proxy::config::RouteConfig {
        name: "all".into(),
        host: None,
        path_prefix: Some("/".into()),
        metered: false,
        priority: 0,
    }];
    config.timeouts.first_byte_secs = 1;
    let proxy = start_proxy(config).await;

    let res = client()
        .get(proxy.url("/slow?session_hash=s-slow"))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["retryable"], true);
    assert!(proxy.state.affinity().lookup("s-slow").is_none());
}

#[tokio::test]
async fn test_backend_unavailable_is_relayed_and_evicts() {
    let a = spawn_backend("A").await;
    let mut config = config_for(&[("A", a)]);
    config.routes = vec![affinity_proxy::config::RouteConfig {
        name: "all".into(),
        host: None,
        path_prefix: Some("/".into()),
        metered: false,
        priority: 0,
    }];
    let proxy = start_proxy(config).await;

    let res = client()
        .get(proxy.url("/unavailable?session_hash=s-2"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    assert!(proxy.state.affinity().lookup("s-2").is_none());
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let a = spawn_backend("A").await;
    let mut config = config_for(&[("A", a)]);
    config.security.max_body_size = 64;
    let proxy = start_proxy(config).await;

    let res = client()
        .post(proxy.url("/gradio_api/queue/join"))
        .json(&json!({"fingerprint": "fp-1", "text": "x".repeat(256)}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert_eq!(proxy.state.ledger.stats().tracked_clients, 0);
}

/// Wait until `backend` has no request in flight.
async fn wait_idle(proxy: &common::TestProxy, backend: &str) {
    let backend = proxy.state.pool().get(backend).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("backend still has requests in flight");
}

#[tokio::test]
async fn test_client_disconnect_cancels_backend_stream() {
    let (addr, dropped) = spawn_endless_backend("A").await;
    let proxy = start_proxy(config_for(&[("A", addr)])).await;

    let mut res = client()
        .get(proxy.url("/gradio_api/stream?session_hash=s-live"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let chunk = res.chunk().await.unwrap().unwrap();
    assert!(HEARTBEAT.starts_with(std::str::from_utf8(&chunk).unwrap()));
    assert_eq!(proxy.state.pool().get("A").unwrap().in_flight(), 1);

    drop(res);

    tokio::time::timeout(Duration::from_secs(5), dropped.notified())
        .await
        .expect("backend stream kept running after the client left");
    wait_idle(&proxy, "A").await;
}

#[tokio::test]
async fn test_shutdown_drain_is_bounded() {
    let (addr, _dropped) = spawn_endless_backend("A").await;
    let mut config = config_for(&[("A", addr)]);
    config.listener.drain_timeout_secs = 1;
    let mut proxy = start_proxy(config).await;

    let mut res = client()
        .get(proxy.url("/gradio_api/stream"))
        .send()
        .await
        .unwrap();
    assert!(res.chunk().await.unwrap().is_some());

    let server = proxy.shut_down();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server kept draining past its deadline")
        .unwrap();
    drop(res);
}
