//! Pull exposition server.
//!
//! A small axum listener serving the scrape surface: `GET /` answers a
//! health check, `GET /metrics` serializes the injected registry, everything
//! else is a 400. All requests go through one dispatch handler so the
//! routing contract stays in a single place.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vitals_core::{bridge, AcceptPolicy, Registry, Result, VitalsError};

use crate::EXPOSITION_CONTENT_TYPE;

#[derive(Clone)]
struct PullState {
    registry: Arc<Registry>,
    policy: AcceptPolicy,
}

/// Handle to a running pull server.
#[derive(Debug)]
pub struct PullServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PullServer {
    /// Bind `port` and start serving scrapes of `registry` in the
    /// background. Port 0 picks an ephemeral port; see [`local_addr`].
    ///
    /// [`local_addr`]: PullServer::local_addr
    pub async fn start(
        registry: Arc<Registry>,
        port: u16,
        policy: AcceptPolicy,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(VitalsError::Bind)?;
        let addr = listener.local_addr().map_err(VitalsError::Bind)?;

        let (shutdown, mut rx) = watch::channel(false);
        let app = Router::new()
            .fallback(dispatch)
            .with_state(PullState { registry, policy });

        let task = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "Pull server exited with error");
            }
        });

        info!(%addr, "Pull exposition server listening");
        Ok(Self {
            addr,
            shutdown,
            task: Some(task),
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, drain in-flight requests, and release the port.
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
            info!(addr = %self.addr, "Pull exposition server stopped");
        }
    }
}

async fn dispatch(
    State(state): State<PullState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
) -> Response {
    if !state.policy.permits(&peer) {
        return (StatusCode::FORBIDDEN, "Forbidden\n").into_response();
    }
    if method != Method::GET {
        return (StatusCode::BAD_REQUEST, "Invalid HTTP Method\n").into_response();
    }
    match uri.path() {
        "/" => (StatusCode::OK, "OK\n").into_response(),
        "/metrics" => match bridge::render_text(&state.registry) {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
                body,
            )
                .into_response(),
            Err(e) => {
                warn!(error = %e, "Failed to serialize registry for scrape");
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization Failure\n").into_response()
            }
        },
        _ => (StatusCode::BAD_REQUEST, "Bad Request\n").into_response(),
    }
}
