//! Target endpoint of a readiness wait

use crate::{Error, Result};
use std::fmt;
use url::Url;

/// Default well-known health path
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Base URL of a dependent service plus the path its health is served on.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    health_path: String,
}

impl Endpoint {
    /// Parse an endpoint from a base URL such as `http://127.0.0.1:5000`.
    pub fn parse(base: &str) -> Result<Self> {
        let url = Url::parse(base.trim())?;
        Self::from_url(url)
    }

    /// Build an endpoint from its parts.
    pub fn from_parts(scheme: &str, host: &str, port: u16) -> Result<Self> {
        Self::parse(&format!("{}://{}:{}", scheme, host, port))
    }

    fn from_url(url: Url) -> Result<Self> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Config(format!(
                    "unsupported endpoint scheme '{}', expected http or https",
                    other
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(Error::Config(format!("endpoint '{}' has no host", url)));
        }
        Ok(Self {
            base: url,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
        })
    }

    /// Override the health path (a leading `/` is added when missing).
    pub fn with_health_path(mut self, path: &str) -> Self {
        let path = path.trim();
        self.health_path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.base.port_or_known_default().unwrap_or(80)
    }

    pub fn scheme(&self) -> &str {
        self.base.scheme()
    }

    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:5000`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host(), self.port())
    }

    /// Full URL the probe issues its GET against.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health_path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}
