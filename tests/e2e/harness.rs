//! E2E Test Harness
//!
//! Locates the API and web frontend of the application under test
//! (typically a local `dotnet run` or a docker-compose stack) and gates
//! the suite on both reporting healthy.

#![allow(dead_code)]

use anyhow::{anyhow, Context, Result};
use readygate::config::HarnessConfig;
use readygate::endpoint::Endpoint;
use readygate::gate::ReadinessGate;
use reqwest::Client;
use std::time::Duration;

/// E2E test harness for the deployed API + web services
pub struct E2EHarness {
    /// HTTP client for page and API requests
    pub http_client: Client,
    /// Dependent service configuration (API_* / WEB_* variables)
    pub config: HarnessConfig,
}

impl E2EHarness {
    /// Create harness from environment variables
    pub fn from_env() -> Result<Self> {
        let config = HarnessConfig::from_env().context("invalid harness configuration")?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn api(&self) -> &Endpoint {
        &self.config.api.endpoint
    }

    pub fn web(&self) -> &Endpoint {
        &self.config.web.endpoint
    }

    /// Wait for the API, then the web frontend, using each service's deadline
    pub async fn wait_healthy(&self) -> Result<()> {
        for service in [&self.config.api, &self.config.web] {
            let gate = ReadinessGate::new(service.http_probe()?, service.gate_config());
            gate.await_healthy(&service.endpoint, service.startup_timeout)
                .await
                .map_err(|e| anyhow!("{} not healthy: {}", service.name, e))?;
        }
        Ok(())
    }

    /// Fetch the raw health body of a service
    pub async fn health_body(&self, endpoint: &Endpoint) -> Result<(u16, String)> {
        let resp = self.http_client.get(endpoint.health_url()).send().await?;
        let status = resp.status().as_u16();
        Ok((status, resp.text().await?))
    }

    /// GET a path relative to a service and return status + body
    pub async fn get(&self, endpoint: &Endpoint, path: &str) -> Result<(u16, String)> {
        let resp = self
            .http_client
            .get(format!("{}{}", endpoint.base_url(), path))
            .send()
            .await?;
        let status = resp.status().as_u16();
        Ok((status, resp.text().await?))
    }
}
