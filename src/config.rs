//! Environment-based configuration
//!
//! Services are described by a set of prefixed variables so the API and the
//! web frontend of the application under test can be configured side by side:
//!
//! - `{PREFIX}_HOST`: bind/probe host (default: 127.0.0.1)
//! - `{PREFIX}_PORT`: port (required unless a default is supplied)
//! - `{PREFIX}_SCHEME`: http or https (default: http)
//! - `{PREFIX}_HEALTH_PATH`: health path (default: /health)
//! - `{PREFIX}_STARTUP_TIMEOUT_MS`: readiness deadline (default: 30000, <= 0 fails at once)
//! - `{PREFIX}_POLL_INTERVAL_MS`: delay between probes (default: 500)
//! - `{PREFIX}_PROBE_TIMEOUT_MS`: per-request timeout (default: 2000)
//! - `{PREFIX}_EXPECT_BODY`: exact health body to require (optional)

use crate::endpoint::Endpoint;
use crate::gate::{GateConfig, DEFAULT_DEADLINE, DEFAULT_EXIT_GRACE, DEFAULT_POLL_INTERVAL};
use crate::probe::{HttpProbe, DEFAULT_PROBE_TIMEOUT};
use crate::{Error, Result};
use std::time::Duration;
use tracing::info;

/// Defaults applied when a variable is unset
#[derive(Debug, Clone)]
pub struct ServiceDefaults {
    pub host: String,
    pub port: Option<u16>,
}

impl ServiceDefaults {
    pub fn port(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: Some(port),
        }
    }
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
        }
    }
}

/// Readiness settings for one dependent service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub endpoint: Endpoint,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub expect_body: Option<String>,
}

impl ServiceConfig {
    /// Read `{prefix}_*` variables from the process environment.
    pub fn from_env(prefix: &str, defaults: &ServiceDefaults) -> Result<Self> {
        Self::from_vars(prefix, defaults, |key| std::env::var(key).ok())
    }

    /// Read `{prefix}_*` variables through `lookup`.
    pub fn from_vars<F>(prefix: &str, defaults: &ServiceDefaults, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let key = format!("{}_{}", prefix, suffix);
            let value = lookup(&key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            (key, value)
        };

        let host = var("HOST").1.unwrap_or_else(|| defaults.host.clone());
        let scheme = var("SCHEME").1.unwrap_or_else(|| "http".to_string());

        let port = match var("PORT") {
            (key, Some(raw)) => raw.parse::<u16>().map_err(|e| {
                Error::Config(format!("{key} must be a port number, got '{raw}': {e}"))
            })?,
            (key, None) => defaults
                .port
                .ok_or_else(|| Error::Config(format!("{key} is required")))?,
        };

        let mut endpoint = Endpoint::from_parts(&scheme, &host, port)?;
        if let (_, Some(path)) = var("HEALTH_PATH") {
            endpoint = endpoint.with_health_path(&path);
        }

        let startup_timeout = parse_millis(var("STARTUP_TIMEOUT_MS"), DEFAULT_DEADLINE)?;
        let poll_interval = parse_millis(var("POLL_INTERVAL_MS"), DEFAULT_POLL_INTERVAL)?;
        let probe_timeout = parse_millis(var("PROBE_TIMEOUT_MS"), DEFAULT_PROBE_TIMEOUT)?;
        if probe_timeout.is_zero() {
            return Err(Error::Config(format!(
                "{prefix}_PROBE_TIMEOUT_MS must be greater than zero"
            )));
        }

        Ok(Self {
            name: prefix.to_ascii_lowercase(),
            endpoint,
            startup_timeout,
            poll_interval,
            probe_timeout,
            expect_body: var("EXPECT_BODY").1,
        })
    }

    /// Gate settings derived from this config.
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            poll_interval: self.poll_interval,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }

    /// HTTP probe honouring the per-request timeout and body contract.
    pub fn http_probe(&self) -> Result<HttpProbe> {
        let probe = HttpProbe::with_timeout(self.probe_timeout)?;
        Ok(match &self.expect_body {
            Some(body) => probe.expect_body(body.clone()),
            None => probe,
        })
    }

    pub fn health_path(&self) -> &str {
        self.endpoint.health_path()
    }
}

/// Dependent services of the application under test
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub api: ServiceConfig,
    pub web: ServiceConfig,
}

impl HarnessConfig {
    /// `API_*` (default port 5000) and `WEB_*` (default port 5001).
    pub fn from_env() -> Result<Self> {
        let api = ServiceConfig::from_env("API", &ServiceDefaults::port(5000))?;
        let web = ServiceConfig::from_env("WEB", &ServiceDefaults::port(5001))?;

        info!(
            api = %api.endpoint,
            web = %web.endpoint,
            api_timeout_ms = api.startup_timeout.as_millis() as u64,
            web_timeout_ms = web.startup_timeout.as_millis() as u64,
            "Loaded harness configuration"
        );

        Ok(Self { api, web })
    }
}

/// Parse a millisecond value; zero or negative means "no time at all".
fn parse_millis((key, raw): (String, Option<String>), default: Duration) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value = raw
        .parse::<i64>()
        .map_err(|e| Error::Config(format!("{key} must be an integer (ms), got '{raw}': {e}")))?;
    Ok(Duration::from_millis(value.max(0) as u64))
}
