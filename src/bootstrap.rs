//! Bringing up the dependent services of a suite
//!
//! Each service gets its own gate invocation, so nothing is shared between
//! services except the probe client.

use crate::endpoint::Endpoint;
use crate::gate::{Readiness, ReadinessGate};
use crate::launch::LaunchSpec;
use crate::probe::Probe;
use crate::Result;
use futures::future::join_all;
use std::time::Duration;
use tracing::{info, warn};

/// One dependent service
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub endpoint: Endpoint,
    /// How to start the service; `None` means wait only
    pub launch: Option<LaunchSpec>,
    pub deadline: Duration,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, endpoint: Endpoint, deadline: Duration) -> Self {
        Self {
            name: name.into(),
            endpoint,
            launch: None,
            deadline,
        }
    }

    /// Start the service with `launch` when it is not already healthy.
    /// The launch spec is bound to the service endpoint.
    pub fn launch(mut self, launch: LaunchSpec) -> Self {
        self.launch = Some(launch.bind_to(&self.endpoint));
        self
    }
}

/// A service that passed its gate
#[derive(Debug)]
pub struct ReadyService {
    pub name: String,
    pub readiness: Readiness,
}

/// Bring services up one after another, in declaration order.
///
/// The first failure aborts the bootstrap; services this call launched are
/// stopped before the error is returned.
pub async fn bootstrap<P: Probe>(
    gate: &ReadinessGate<P>,
    services: &[ServiceSpec],
) -> Result<Vec<ReadyService>> {
    let mut ready: Vec<ReadyService> = Vec::with_capacity(services.len());

    for service in services {
        match bring_up(gate, service).await {
            Ok(readiness) => ready.push(ReadyService {
                name: service.name.clone(),
                readiness,
            }),
            Err(e) => {
                stop_launched(&mut ready).await;
                return Err(e.for_service(&service.name));
            }
        }
    }

    Ok(ready)
}

/// Bring independent services up concurrently.
///
/// All gates run to their own terminal state; if any failed, the services that
/// did come up through a launch are stopped and the first failure is returned.
pub async fn ensure_concurrently<P: Probe>(
    gate: &ReadinessGate<P>,
    services: &[ServiceSpec],
) -> Result<Vec<ReadyService>> {
    let results = join_all(services.iter().map(|s| bring_up(gate, s))).await;

    let mut ready = Vec::with_capacity(services.len());
    let mut first_err = None;
    for (service, result) in services.iter().zip(results) {
        match result {
            Ok(readiness) => ready.push(ReadyService {
                name: service.name.clone(),
                readiness,
            }),
            Err(e) if first_err.is_none() => first_err = Some(e.for_service(&service.name)),
            Err(e) => warn!(service = %service.name, error = %e, "Service failed to start"),
        }
    }

    match first_err {
        Some(e) => {
            stop_launched(&mut ready).await;
            Err(e)
        }
        None => Ok(ready),
    }
}

async fn bring_up<P: Probe>(gate: &ReadinessGate<P>, service: &ServiceSpec) -> Result<Readiness> {
    info!(service = %service.name, endpoint = %service.endpoint, "Waiting for service");
    match &service.launch {
        Some(launch) => gate.ensure_running(&service.endpoint, launch, service.deadline).await,
        None => gate.await_healthy(&service.endpoint, service.deadline).await,
    }
}

async fn stop_launched(ready: &mut [ReadyService]) {
    for service in ready.iter_mut() {
        if let Some(process) = service.readiness.process.as_mut() {
            if let Err(e) = process.kill().await {
                warn!(service = %service.name, error = %e, "Failed to stop service");
            }
        }
    }
}
