//! Health endpoint tests
//!
//! Validates that both services are running and honour the health contract.

use crate::e2e::E2EHarness;

/// Test that all services report healthy status
#[tokio::test]
#[ignore = "requires running API and web services"]
async fn test_all_services_healthy() {
    let harness = E2EHarness::from_env().expect("harness config");

    harness
        .wait_healthy()
        .await
        .expect("All services should be healthy");
}

/// Test that the API health endpoint returns exactly "Healthy"
#[tokio::test]
#[ignore = "requires running API and web services"]
async fn test_api_health_returns_healthy() {
    let harness = E2EHarness::from_env().expect("harness config");
    harness.wait_healthy().await.expect("services should be healthy");

    let (status, body) = harness
        .health_body(harness.api())
        .await
        .expect("Health request should succeed");

    assert_eq!(status, 200, "Health endpoint should return 200");
    assert_eq!(body, "Healthy", "Health endpoint should return 'Healthy'");
}

/// Test that the web frontend health endpoint returns exactly "Healthy"
#[tokio::test]
#[ignore = "requires running API and web services"]
async fn test_web_health_returns_healthy() {
    let harness = E2EHarness::from_env().expect("harness config");
    harness.wait_healthy().await.expect("services should be healthy");

    let (status, body) = harness
        .health_body(harness.web())
        .await
        .expect("Health request should succeed");

    assert_eq!(status, 200, "Health endpoint should return 200");
    assert_eq!(body, "Healthy", "Health endpoint should return 'Healthy'");
}

/// Test that the web frontend renders its landing page
#[tokio::test]
#[ignore = "requires running API and web services"]
async fn test_web_renders_landing_page() {
    let harness = E2EHarness::from_env().expect("harness config");
    harness.wait_healthy().await.expect("services should be healthy");

    let (status, body) = harness
        .get(harness.web(), "/")
        .await
        .expect("Landing page request should succeed");

    assert!((200..300).contains(&status), "Landing page should return 2xx");
    assert!(
        body.to_ascii_lowercase().contains("<html"),
        "Landing page should be server-rendered HTML"
    );
}
