//! Minimal dependent service honouring the health wire contract
//!
//! `GET /health` answers `503 Unhealthy` until the startup delay has passed and
//! `200 Healthy` afterwards. Used by the `health-stub` binary and by tests.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Body served once the stub is ready
pub const HEALTHY_BODY: &str = "Healthy";
/// Body served while the stub is still starting
pub const UNHEALTHY_BODY: &str = "Unhealthy";

/// Shared stub state
#[derive(Clone)]
pub struct StubState {
    ready_at: Instant,
    health_requests: Arc<AtomicU64>,
}

impl StubState {
    /// Stub that turns healthy `delay` from now.
    pub fn ready_after(delay: Duration) -> Self {
        Self {
            ready_at: Instant::now() + delay,
            health_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of `/health` requests served so far.
    pub fn health_requests(&self) -> u64 {
        self.health_requests.load(Ordering::Relaxed)
    }

    fn is_ready(&self) -> bool {
        Instant::now() >= self.ready_at
    }
}

/// Build the stub router
pub fn router(state: StubState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<StubState>) -> (StatusCode, &'static str) {
    state.health_requests.fetch_add(1, Ordering::Relaxed);
    if state.is_ready() {
        (StatusCode::OK, HEALTHY_BODY)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, UNHEALTHY_BODY)
    }
}
