//! Health probes
//!
//! A probe is a single health-check request. Failures are transient: they are
//! folded into `false` (or a [`ProbeOutcome`]) and never surfaced as errors,
//! so a probe can sit in a tight polling loop.

use crate::endpoint::Endpoint;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout, distinct from the overall readiness deadline
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that can tell whether an endpoint is healthy right now.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true only when the endpoint answered successfully.
    async fn probe(&self, endpoint: &Endpoint) -> bool;
}

/// Detailed result of one health request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// 2xx response (and matching body, when a body contract is set)
    Healthy,
    /// The service answered, but not with success
    Unhealthy {
        #[serde(rename = "http_status")]
        status: u16,
        body: String,
    },
    /// No usable response: connection refused, timeout, DNS, ...
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// HTTP GET probe against `Endpoint::health_url`.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
    expected_body: Option<String>,
}

impl HttpProbe {
    /// Create a probe with the default per-request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Create a probe whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            expected_body: None,
        })
    }

    /// Require the (trimmed) response body to equal `body`, e.g. `"Healthy"`.
    pub fn expect_body(mut self, body: impl Into<String>) -> Self {
        self.expected_body = Some(body.into());
        self
    }

    /// Issue one request and classify the response.
    pub async fn check(&self, endpoint: &Endpoint) -> ProbeOutcome {
        let url = endpoint.health_url();
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                return ProbeOutcome::Unreachable {
                    reason: e.to_string(),
                }
            }
        };

        let status = resp.status();
        if !status.is_success() {
            return ProbeOutcome::Unhealthy {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            };
        }

        let Some(expected) = &self.expected_body else {
            return ProbeOutcome::Healthy;
        };

        match resp.text().await {
            Ok(body) if body.trim() == expected => ProbeOutcome::Healthy,
            Ok(body) => ProbeOutcome::Unhealthy {
                status: status.as_u16(),
                body,
            },
            Err(e) => ProbeOutcome::Unreachable {
                reason: format!("failed to read body: {e}"),
            },
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        let outcome = self.check(endpoint).await;
        match &outcome {
            ProbeOutcome::Healthy => {}
            ProbeOutcome::Unhealthy { status, body } => {
                debug!(endpoint = %endpoint, status, body = %body.trim(), "Health probe unhealthy");
            }
            ProbeOutcome::Unreachable { reason } => {
                debug!(endpoint = %endpoint, reason = %reason, "Health probe unreachable");
            }
        }
        outcome.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{self, StubState};
    use tokio::net::TcpListener;

    async fn serve(state: StubState) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, stub::router(state)).await;
        });
        Endpoint::parse(&format!("http://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_healthy_stub_reports_healthy() {
        let endpoint = serve(StubState::ready_after(Duration::ZERO)).await;
        let probe = HttpProbe::new().unwrap().expect_body("Healthy");

        assert_eq!(probe.check(&endpoint).await, ProbeOutcome::Healthy);
        assert!(probe.probe(&endpoint).await);
    }

    #[tokio::test]
    async fn test_starting_stub_reports_unhealthy() {
        let endpoint = serve(StubState::ready_after(Duration::from_secs(60))).await;
        let probe = HttpProbe::new().unwrap();

        match probe.check(&endpoint).await {
            ProbeOutcome::Unhealthy { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "Unhealthy");
            }
            other => panic!("expected unhealthy, got {:?}", other),
        }
        assert!(!probe.probe(&endpoint).await);
    }

    #[tokio::test]
    async fn test_body_contract_mismatch_is_unhealthy() {
        let endpoint = serve(StubState::ready_after(Duration::ZERO)).await;
        let probe = HttpProbe::new().unwrap().expect_body("OK");

        assert!(!probe.probe(&endpoint).await);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ProbeOutcome::Unhealthy {
            status: 503,
            body: "Unhealthy".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"unhealthy\""));
        assert!(json.contains("\"http_status\":503"));
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Endpoint::parse(&format!("http://{}", addr)).unwrap();
        let probe = HttpProbe::with_timeout(Duration::from_millis(500)).unwrap();

        assert!(matches!(
            probe.check(&endpoint).await,
            ProbeOutcome::Unreachable { .. }
        ));
        assert!(!probe.probe(&endpoint).await);
    }
}
