//! Integration tests for the change-notification listener
//!
//! Each test binds the listener to an ephemeral port and drives it with a
//! real HTTP client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use twinsync_core::domain::Side;
use twinsync_daemon::webhook::WebhookServer;
use twinsync_engine::NotificationQueue;

/// Starts a listener on an ephemeral port; returns its address and queue
async fn start_server() -> (SocketAddr, Arc<NotificationQueue>, CancellationToken) {
    let queue = Arc::new(NotificationQueue::new());
    let server = WebhookServer::new(Arc::clone(&queue), "127.0.0.1:0").unwrap();
    let shutdown = CancellationToken::new();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server
            .run(server_shutdown, Some(tx))
            .await
            .expect("webhook server run");
    });

    let addr = rx.await.expect("server reports bound address");
    (addr, queue, shutdown)
}

#[tokio::test]
async fn test_notify_enqueues_signal() {
    let (addr, queue, shutdown) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/notify/left"))
        .body("folder-9")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    assert!(queue.has_pending_for(Side::Left));
    let signals = queue.drain();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].side, Side::Left);
    assert_eq!(signals[0].resource_hint.as_deref(), Some("folder-9"));

    shutdown.cancel();
}

#[tokio::test]
async fn test_notify_without_body_has_no_hint() {
    let (addr, queue, shutdown) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/notify/right"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let signals = queue.drain();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].side, Side::Right);
    assert!(signals[0].resource_hint.is_none());

    shutdown.cancel();
}

#[tokio::test]
async fn test_duplicate_notifications_coalesce() {
    let (addr, queue, shutdown) = start_server().await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let resp = client
            .post(format!("http://{addr}/notify/left"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    }

    // One poll covers any number of notifications for a side
    assert_eq!(queue.drain().len(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_healthz() {
    let (addr, _queue, shutdown) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");

    shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_route_404() {
    let (addr, queue, shutdown) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/notify/middle"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    assert!(!queue.has_pending());

    shutdown.cancel();
}
