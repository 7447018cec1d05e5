//! # readygate
//!
//! Service-readiness bootstrap for end-to-end suites.
//!
//! Before an end-to-end run touches the API or the web frontend of the
//! application under test, each dependent service has to answer on its health
//! endpoint. The readiness gate polls that endpoint and, when the service is
//! down, launches it as a subprocess and waits until it is healthy, the
//! process dies, or the deadline passes.
//!
//! ## Modules
//!
//! - **gate**: the polling loop, `await_healthy` and `ensure_running`
//! - **probe**: single health requests and the `Probe` seam
//! - **launch**: launch specs, spawned process handles, output capture
//! - **bootstrap**: several services, in order or concurrently
//! - **stub**: a dependent service that speaks the health contract

pub mod bootstrap;
pub mod config;
pub mod endpoint;
pub mod gate;
pub mod launch;
pub mod probe;
pub mod stub;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::bootstrap::{bootstrap, ensure_concurrently, ReadyService, ServiceSpec};
    pub use crate::config::{HarnessConfig, ServiceConfig, ServiceDefaults};
    pub use crate::endpoint::Endpoint;
    pub use crate::gate::{GateConfig, Readiness, ReadinessGate, ReadinessState};
    pub use crate::launch::{BindVars, CapturedOutput, LaunchSpec, ManagedProcess, Stream};
    pub use crate::probe::{HttpProbe, Probe, ProbeOutcome};
    pub use crate::{Error, Result};
}
