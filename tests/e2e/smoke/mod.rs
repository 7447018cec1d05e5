//! Smoke tests
//!
//! Basic validation that the dependent services are up and speak the
//! health contract.

pub mod health_tests;
