//! Push daemon: periodic delivery of registry snapshots to a remote
//! collector.
//!
//! One background task per target. The loop sleeps the remaining interval as
//! a cancellable timer (a `select!` against the shutdown channel), so stop
//! latency is immediate rather than bounded by a polling quantum. Transport
//! failures are logged and retried on the next interval; nothing short of an
//! explicit stop ends the loop. No metric lock is ever held across the POST:
//! the snapshot is fully rendered before the send starts.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vitals_core::{bridge, Registry, Result, VitalsError};

use crate::EXPOSITION_CONTENT_TYPE;

/// Handle to a running push daemon.
#[derive(Debug)]
pub struct PushDaemon {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PushDaemon {
    /// Establish the transport and spawn the background push loop.
    ///
    /// Fails with `NoActiveRegistry` if the registry was already destroyed
    /// and with `TransportInit` if the URL or HTTP client cannot be set up;
    /// in both cases nothing is spawned.
    pub async fn start(
        registry: Arc<Registry>,
        url: &str,
        interval: Duration,
    ) -> Result<Self> {
        if registry.is_closed() {
            return Err(VitalsError::NoActiveRegistry);
        }
        let url = reqwest::Url::parse(url)
            .map_err(|e| VitalsError::TransportInit(format!("Invalid push URL '{url}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VitalsError::TransportInit(e.to_string()))?;

        let (shutdown, rx) = watch::channel(false);
        info!(%url, ?interval, "Push daemon started");
        let task = tokio::spawn(push_loop(registry, client, url, interval, rx));
        Ok(Self {
            shutdown,
            task: Some(task),
        })
    }

    /// Request termination and join the background task. Safe to call more
    /// than once; a second call is a no-op.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
            info!("Push daemon stopped");
        }
    }
}

async fn push_loop(
    registry: Arc<Registry>,
    client: reqwest::Client,
    url: reqwest::Url,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_pushed: Option<Instant> = None;
    loop {
        let remaining = match last_pushed {
            None => Duration::ZERO,
            Some(at) => interval.saturating_sub(at.elapsed()),
        };
        if !remaining.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.changed() => break,
            }
            continue;
        }
        if *shutdown.borrow() {
            break;
        }

        match bridge::render_text(&registry) {
            Ok(body) => {
                let sent = client
                    .post(url.clone())
                    .header(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)
                    .body(body)
                    .send()
                    .await;
                match sent {
                    Ok(resp) if resp.status().is_success() => {
                        debug!("Pushed metrics snapshot");
                    }
                    Ok(resp) => {
                        warn!(status = %resp.status(), "Push target rejected snapshot");
                    }
                    Err(e) => {
                        let e = VitalsError::TransportSend(e.to_string());
                        warn!(error = %e, "Push failed, will retry next interval");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Skipping push, snapshot unavailable");
            }
        }
        last_pushed = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use tokio::sync::mpsc;
    use vitals_core::LockDiscipline;

    async fn ingest(
        State(tx): State<mpsc::Sender<String>>,
        body: String,
    ) -> StatusCode {
        let _ = tx.send(body).await;
        StatusCode::OK
    }

    /// A capturing collector endpoint; returns its URL and the body stream.
    async fn collector() -> (String, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let app = Router::new().route("/ingest", post(ingest)).with_state(tx);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .unwrap();
        let url = format!("http://{}/ingest", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (url, rx)
    }

    fn instrumented_registry() -> Arc<Registry> {
        let registry = Arc::new(Registry::new(LockDiscipline::Mutex));
        let counter = registry
            .counter("push_test_events_total", "Events")
            .unwrap();
        counter.add(12.0).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_snapshots_arrive_at_the_collector() {
        let (url, mut rx) = collector().await;
        let registry = instrumented_registry();
        let mut daemon =
            PushDaemon::start(registry, &url, Duration::from_millis(50))
                .await
                .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no push within timeout")
            .unwrap();
        assert!(body.contains("push_test_events_total 12"));

        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_pushes_respect_the_interval() {
        let (url, mut rx) = collector().await;
        let registry = instrumented_registry();
        let mut daemon =
            PushDaemon::start(registry, &url, Duration::from_millis(100))
                .await
                .unwrap();

        // First push fires immediately, the second only after the interval.
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(first.is_ok());
        let started = std::time::Instant::now();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(second.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(50));

        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (url, _rx) = collector().await;
        let registry = instrumented_registry();
        let mut daemon =
            PushDaemon::start(registry, &url, Duration::from_secs(3600))
                .await
                .unwrap();
        // A very long interval must not delay shutdown.
        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            daemon.stop().await;
            daemon.stop().await;
        })
        .await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn test_destroyed_registry_refuses_to_start() {
        let registry = instrumented_registry();
        registry.destroy();
        let err = PushDaemon::start(
            registry,
            "http://127.0.0.1:1/ingest",
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VitalsError::NoActiveRegistry));
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_transport_init_error() {
        let registry = instrumented_registry();
        let err = PushDaemon::start(registry, "not a url", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, VitalsError::TransportInit(_)));
    }

    #[tokio::test]
    async fn test_send_failures_do_not_kill_the_loop() {
        // Nothing listens on this port; every push fails.
        let registry = instrumented_registry();
        let mut daemon = PushDaemon::start(
            registry.clone(),
            "http://127.0.0.1:9/ingest",
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The daemon is still running and stops cleanly on request.
        let stopped =
            tokio::time::timeout(Duration::from_secs(5), daemon.stop()).await;
        assert!(stopped.is_ok());
        // Metric updates kept working throughout.
        registry.get("push_test_events_total").unwrap().inc().unwrap();
    }
}
