//! Health check HTTP server
//!
//! Optional endpoints for operators and orchestrators. `/health` and
//! `/ready` follow the session state; `/metrics` exports the global
//! counters.

use crate::observability::metrics::{metrics, MetricsSnapshot};
use crate::transport::mqtt::SessionState;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// HTTP health check server
pub struct HealthServer {
    client_id: String,
    port: u16,
    state_rx: watch::Receiver<SessionState>,
}

impl HealthServer {
    pub fn new(client_id: impl Into<String>, port: u16, state_rx: watch::Receiver<SessionState>) -> Self {
        Self {
            client_id: client_id.into(),
            port,
            state_rx,
        }
    }

    /// Bind and serve until shutdown is signalled
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, JoinHandle<()>), warp::Error> {
        let routes = self.routes();
        let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(
            ([0, 0, 0, 0], self.port),
            async move {
                loop {
                    let stop = *shutdown_rx.borrow();
                    if stop || shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            },
        )?;

        tracing::info!(%addr, "Health server listening");
        Ok((addr, tokio::spawn(server)))
    }

    /// All endpoints as one filter
    pub fn routes(self: &Arc<Self>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - session state with publish counters
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.health_status();
                let code = status_code(status.status == "healthy");
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /ready - usable session
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let ready = server.state_rx.borrow().is_usable();
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&response),
                    status_code(ready),
                ))
            }
        });

        // GET /live - process is up
        let live_route = warp::path("live").and(warp::get()).map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            })
        });

        // GET /metrics
        let metrics_route = warp::path("metrics")
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        health_route.or(ready_route).or(live_route).or(metrics_route)
    }

    fn health_status(&self) -> HealthStatus {
        let state = self.state_rx.borrow().clone();
        let snapshot = metrics().get_metrics();

        HealthStatus {
            status: if state.is_usable() { "healthy" } else { "unhealthy" },
            session_state: state.to_string(),
            client_id: self.client_id.clone(),
            timestamp: current_timestamp(),
            metrics: snapshot,
        }
    }
}

fn status_code(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    session_state: String,
    client_id: String,
    timestamp: u64,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
