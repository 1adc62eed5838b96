//! Change-notification listener
//!
//! Exposes the inbound callback endpoint providers deliver change
//! notifications to. The contract is deliberately thin: a request only
//! means "poll that provider soon". Duplicate and spurious deliveries are
//! tolerated: the signal queue coalesces them and the next run's change
//! detection sorts out what actually happened.
//!
//! Routes:
//! - `POST /notify/left` and `POST /notify/right`: body (if any) is kept
//!   as an opaque resource hint; responds `202 Accepted`
//! - `GET /healthz`: liveness probe

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use twinsync_core::domain::Side;
use twinsync_core::ports::ChangeSignal;
use twinsync_engine::NotificationQueue;

/// HTTP listener feeding the engine's notification queue
pub struct WebhookServer {
    queue: Arc<NotificationQueue>,
    addr: SocketAddr,
}

impl WebhookServer {
    /// Creates a listener bound to `endpoint`, e.g. `"127.0.0.1:7440"`
    pub fn new(queue: Arc<NotificationQueue>, endpoint: &str) -> anyhow::Result<Self> {
        let addr: SocketAddr = endpoint.parse()?;
        Ok(Self { queue, addr })
    }

    /// Starts the listener; runs until the cancellation token fires
    ///
    /// Binds eagerly and returns the bound address through `on_bound`
    /// (useful when the configured port is 0).
    pub async fn run(
        &self,
        shutdown: tokio_util::sync::CancellationToken,
        on_bound: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
    ) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        let bound = listener.local_addr()?;
        info!(addr = %bound, "Change-notification listener ready");
        if let Some(tx) = on_bound {
            let _ = tx.send(bound);
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = result?;
                    let io = TokioIo::new(stream);
                    let queue = Arc::clone(&self.queue);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let queue = Arc::clone(&queue);
                            async move { handle_request(req, &queue).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            error!(error = %e, "Webhook HTTP connection error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("Change-notification listener shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Handle a single HTTP request.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    queue: &NotificationQueue,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::GET, "/healthz") => Ok(plain(StatusCode::OK, "ok")),

        (Method::POST, "/notify/left") | (Method::POST, "/notify/right") => {
            let side = if path.ends_with("/left") {
                Side::Left
            } else {
                Side::Right
            };

            let body = req.into_body().collect().await?.to_bytes();
            let hint = if body.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&body).into_owned())
            };

            debug!(side = %side, hint = hint.as_deref().unwrap_or(""), "Change signal received");
            queue.push(ChangeSignal::new(side, hint));

            Ok(plain(StatusCode::ACCEPTED, "queued"))
        }

        _ => Ok(plain(StatusCode::NOT_FOUND, "Not Found")),
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let queue = Arc::new(NotificationQueue::new());
        assert!(WebhookServer::new(queue, "127.0.0.1:0").is_ok());
    }

    #[test]
    fn test_invalid_addr_rejected() {
        let queue = Arc::new(NotificationQueue::new());
        assert!(WebhookServer::new(queue, "not-an-address").is_err());
    }
}
