//! Readiness gate
//!
//! Makes sure a dependent HTTP service is reachable before dependent work runs,
//! starting it as a subprocess when it is not.
//!
//! ```text
//! UNKNOWN --(probe success)----------------------> HEALTHY
//! UNKNOWN --(process exit / launch failure)------> FAILED
//! UNKNOWN --(deadline elapsed)-------------------> TIMED_OUT
//! ```
//!
//! Every invocation owns its own state, output buffer and child handle, so
//! several gates can run side by side.

use crate::endpoint::Endpoint;
use crate::launch::{LaunchSpec, ManagedProcess};
use crate::probe::{HttpProbe, Probe};
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Default delay between probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Polling never runs faster than this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default overall readiness deadline
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
/// How long to wait for output readers after the child exits
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(250);
/// Stand-in for deadlines too large to represent as an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Readiness of a target within one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Unknown,
    Healthy,
    TimedOut,
    Failed,
}

impl ReadinessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessState::Unknown => "unknown",
            ReadinessState::Healthy => "healthy",
            ReadinessState::TimedOut => "timed_out",
            ReadinessState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadinessState::Unknown)
    }
}

/// Gate tuning
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Delay between probes (clamped to [`MIN_POLL_INTERVAL`])
    pub poll_interval: Duration,
    /// Grace period for draining child output after an exit
    pub exit_grace: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }
}

/// Successful readiness wait
#[derive(Debug)]
pub struct Readiness {
    /// Probes issued, including the initial one in `ensure_running`
    pub probes: u32,
    /// Time from the start of the call to the healthy probe
    pub elapsed: Duration,
    /// The process launched to bring the target up, if one was needed.
    /// It keeps running; its lifecycle belongs to the caller now.
    ///
    /// Piped output is drained by tasks on the current runtime, so the child
    /// must not outlive it unless it was launched with
    /// [`LaunchSpec::log_file`]. See [`ManagedProcess::detach`].
    pub process: Option<ManagedProcess>,
}

impl Readiness {
    pub fn state(&self) -> ReadinessState {
        ReadinessState::Healthy
    }

    /// True if the gate had to launch the service.
    pub fn spawned(&self) -> bool {
        self.process.is_some()
    }
}

/// Polls a probe until the target is healthy, launching it if needed.
pub struct ReadinessGate<P = HttpProbe> {
    probe: P,
    config: GateConfig,
}

impl ReadinessGate<HttpProbe> {
    /// Gate with an HTTP probe and default settings.
    pub fn http() -> Result<Self> {
        Ok(Self::new(HttpProbe::new()?, GateConfig::default()))
    }
}

impl<P: Probe> ReadinessGate<P> {
    pub fn new(probe: P, mut config: GateConfig) -> Self {
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = config.poll_interval.as_millis() as u64,
                floor_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "Poll interval below floor, clamping"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        Self { probe, config }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn probe_ref(&self) -> &P {
        &self.probe
    }

    /// One health check; never fails.
    pub async fn probe(&self, endpoint: &Endpoint) -> bool {
        self.probe.probe(endpoint).await
    }

    /// Poll until healthy or until `deadline` has elapsed.
    ///
    /// A zero deadline fails immediately without probing.
    pub async fn await_healthy(&self, endpoint: &Endpoint, deadline: Duration) -> Result<Readiness> {
        let started = Instant::now();
        let probes = self
            .poll_until(endpoint, started, deadline_from(started, deadline), 0)
            .await?;
        Ok(Readiness {
            probes,
            elapsed: started.elapsed(),
            process: None,
        })
    }

    /// Probe once; if unhealthy, launch `launch` and wait for health, exit or
    /// deadline, whichever comes first.
    pub async fn ensure_running(
        &self,
        endpoint: &Endpoint,
        launch: &LaunchSpec,
        deadline: Duration,
    ) -> Result<Readiness> {
        let started = Instant::now();
        let deadline_at = deadline_from(started, deadline);

        if deadline.is_zero() {
            return Err(self.timed_out(endpoint, started, 0));
        }

        let healthy = tokio::time::timeout_at(deadline_at, self.probe.probe(endpoint))
            .await
            .unwrap_or(false);
        if healthy {
            info!(endpoint = %endpoint, "Service already healthy, not launching");
            return Ok(Readiness {
                probes: 1,
                elapsed: started.elapsed(),
                process: None,
            });
        }

        let mut process = match launch.spawn() {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    endpoint = %endpoint,
                    state = ReadinessState::Failed.as_str(),
                    error = %e,
                    "Service could not be launched"
                );
                return Err(e);
            }
        };

        let outcome = {
            let exited = process.child_mut().wait();
            // The child needs a moment to bind; the next probe waits one interval.
            let polled = async {
                let first = (Instant::now() + self.config.poll_interval).min(deadline_at);
                tokio::time::sleep_until(first).await;
                self.poll_until(endpoint, started, deadline_at, 1).await
            };
            tokio::select! {
                biased;
                status = exited => Outcome::Exited(status),
                polled = polled => Outcome::Polled(polled),
            }
        };

        match outcome {
            Outcome::Polled(Ok(probes)) => Ok(Readiness {
                probes,
                elapsed: started.elapsed(),
                process: Some(process),
            }),
            Outcome::Polled(Err(e)) => {
                if let Err(kill_err) = process.kill().await {
                    warn!(pid = ?process.pid(), error = %kill_err, "Failed to stop service after timeout");
                }
                Err(e)
            }
            Outcome::Exited(status) => {
                let exit_code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!(pid = ?process.pid(), error = %e, "Failed to wait on service process");
                        None
                    }
                };
                let output = process.drain_output(self.config.exit_grace).await;
                warn!(
                    endpoint = %endpoint,
                    state = ReadinessState::Failed.as_str(),
                    exit_code = ?exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    output_lines = output.len(),
                    "Service exited before becoming healthy"
                );
                Err(Error::Startup { exit_code, output })
            }
        }
    }

    /// Probe at the configured interval until healthy or `deadline_at`.
    /// Returns the total probe count (`already` + probes issued here).
    async fn poll_until(
        &self,
        endpoint: &Endpoint,
        started: Instant,
        deadline_at: Instant,
        already: u32,
    ) -> Result<u32> {
        let mut probes = already;
        loop {
            if Instant::now() >= deadline_at {
                return Err(self.timed_out(endpoint, started, probes));
            }

            probes += 1;
            // An in-flight probe never outlives the deadline
            let healthy = tokio::time::timeout_at(deadline_at, self.probe.probe(endpoint))
                .await
                .unwrap_or(false);
            if healthy {
                info!(
                    endpoint = %endpoint,
                    state = ReadinessState::Healthy.as_str(),
                    probes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Service healthy"
                );
                return Ok(probes);
            }

            let next = (Instant::now() + self.config.poll_interval).min(deadline_at);
            tokio::time::sleep_until(next).await;
        }
    }

    fn timed_out(&self, endpoint: &Endpoint, started: Instant, probes: u32) -> Error {
        let elapsed = started.elapsed();
        warn!(
            endpoint = %endpoint,
            state = ReadinessState::TimedOut.as_str(),
            probes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Service not healthy before deadline"
        );
        Error::Timeout { elapsed, probes }
    }
}

fn deadline_from(started: Instant, deadline: Duration) -> Instant {
    started
        .checked_add(deadline)
        .unwrap_or_else(|| started + FAR_FUTURE)
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Polled(Result<u32>),
}
