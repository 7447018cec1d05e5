//! End-to-end test infrastructure
//!
//! This module provides the harness used to validate a deployed API + web
//! frontend pair once the readiness gate has let the suite through.

pub mod harness;
pub mod smoke;

pub use harness::*;
