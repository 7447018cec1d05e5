//! ensure_running against real subprocesses
//!
//! The `health-stub` binary plays the dependent service. It binds to the
//! `HOST`/`PORT` the gate injects, so a healthy result also proves the
//! environment overlay reached the child.

use readygate::endpoint::Endpoint;
use readygate::gate::{GateConfig, ReadinessGate, ReadinessState, DEFAULT_POLL_INTERVAL};
use readygate::launch::{LaunchSpec, Stream};
use readygate::probe::HttpProbe;
use readygate::Error;

use std::time::{Duration, Instant};

const STUB: &str = env!("CARGO_BIN_EXE_health-stub");

fn free_endpoint() -> Endpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Endpoint::parse(&format!("http://{}", addr)).unwrap()
}

fn gate() -> ReadinessGate {
    ReadinessGate::new(
        HttpProbe::with_timeout(Duration::from_secs(2))
            .unwrap()
            .expect_body("Healthy"),
        GateConfig::default(),
    )
}

fn stub_spec(endpoint: &Endpoint, extra: &[&str]) -> LaunchSpec {
    LaunchSpec::new(STUB)
        .args(extra.iter().copied())
        .env("READYGATE_LOG_FORMAT", "json")
        .bind_to(endpoint)
}

#[tokio::test]
async fn test_launches_stub_and_waits_for_health() {
    let endpoint = Endpoint::parse("http://127.0.0.1:43141").unwrap();
    let spec = stub_spec(&endpoint, &["--startup-delay", "2s"]);

    let mut ready = gate()
        .ensure_running(&endpoint, &spec, Duration::from_millis(30_000))
        .await
        .expect("stub should come up");

    assert!(ready.spawned());
    assert!(ready.elapsed >= Duration::from_secs(2));
    // One check before launch, then every 500ms from launch until the 2s delay has passed
    let after_launch = ready.probes - 1;
    assert!(
        (4..=5).contains(&after_launch),
        "probes after launch = {after_launch}"
    );

    let process = ready.process.as_mut().unwrap();
    assert!(process.pid().is_some());
    assert!(process.try_status().unwrap().is_none(), "stub must still run");
    assert!(process
        .output()
        .stream(Stream::Stdout)
        .any(|l| l.contains("Now listening on: http://127.0.0.1:43141")));

    process.kill().await.unwrap();
}

#[tokio::test]
async fn test_second_call_reuses_running_service() {
    let endpoint = free_endpoint();
    let spec = stub_spec(&endpoint, &[]);
    let gate = gate();

    let mut first = gate
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(first.spawned());

    let second = gate
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(!second.spawned());
    assert_eq!(second.probes, 1);

    first.process.as_mut().unwrap().kill().await.unwrap();
}

#[tokio::test]
async fn test_crash_fails_fast_with_exit_code_and_output() {
    let endpoint = free_endpoint();
    let spec = stub_spec(&endpoint, &["--startup-delay", "60s", "--exit-after", "0s", "--exit-code", "1"]);

    let started = Instant::now();
    let err = gate()
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(
        started.elapsed() < Duration::from_secs(5),
        "crash should not wait out the deadline: {:?}",
        started.elapsed()
    );
    assert_eq!(err.state(), ReadinessState::Failed);
    assert_eq!(err.exit_code(), Some(1));
    let output = err.captured_output().expect("startup errors carry output");
    assert!(output.contains("simulated crash"), "output:\n{output}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_immediate_exit_is_reported_within_one_interval() {
    let endpoint = free_endpoint();
    let spec = LaunchSpec::new("sh")
        .arg("-c")
        .arg("echo \"bind failed on $PORT\" >&2; exit 1")
        .bind_to(&endpoint);

    let started = Instant::now();
    let err = gate()
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(started.elapsed() < DEFAULT_POLL_INTERVAL + Duration::from_millis(500));
    match err {
        Error::Startup { exit_code, output } => {
            assert_eq!(exit_code, Some(1));
            let expected = format!("bind failed on {}", endpoint.port());
            assert_eq!(output.stream(Stream::Stderr).collect::<Vec<_>>(), [expected.as_str()]);
        }
        other => panic!("expected startup error, got {other}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_exit_code_zero_before_health_is_still_failure() {
    let endpoint = free_endpoint();
    let spec = LaunchSpec::new("true");

    let err = gate()
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Startup { exit_code: Some(0), .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_never_healthy_never_exiting_times_out() {
    let endpoint = free_endpoint();
    let spec = LaunchSpec::new("sleep").arg("30");
    let deadline = Duration::from_millis(1000);

    let started = Instant::now();
    let err = gate()
        .ensure_running(&endpoint, &spec, deadline)
        .await
        .unwrap_err();
    let wall = started.elapsed();

    match err {
        Error::Timeout { elapsed, .. } => {
            assert!(elapsed >= deadline, "elapsed = {:?}", elapsed);
            assert!(elapsed <= deadline + DEFAULT_POLL_INTERVAL, "elapsed = {:?}", elapsed);
        }
        other => panic!("expected timeout, got {other}"),
    }
    // Reaping the killed child is quick
    assert!(wall <= deadline + DEFAULT_POLL_INTERVAL + Duration::from_millis(500));
}

#[tokio::test]
async fn test_missing_executable_is_launch_error() {
    let endpoint = free_endpoint();
    let spec = LaunchSpec::new("/definitely/not/a/real/binary");

    let started = Instant::now();
    let err = gate()
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Launch { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[cfg(unix)]
#[tokio::test]
async fn test_working_directory_and_env_overlay() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let endpoint = free_endpoint();
    let spec = LaunchSpec::new("sh")
        .arg("-c")
        .arg("cat marker.txt; echo \" $URLS $GREETING\"; exit 3")
        .current_dir(dir.path())
        .env("GREETING", "hello")
        .bind_to(&endpoint);

    let err = gate()
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(3));
    let output = err.captured_output().unwrap();
    let expected = format!("present {} hello", endpoint.base_url());
    assert!(output.contains(&expected), "output:\n{output}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_utf8_output_does_not_kill_the_service() {
    let endpoint = free_endpoint();
    let spec = LaunchSpec::new("sh")
        .arg("-c")
        .arg("printf 'caf\\351\\n'; sleep 0.3; echo still-alive; sleep 30");
    let deadline = Duration::from_secs(3);

    let err = gate()
        .ensure_running(&endpoint, &spec, deadline)
        .await
        .unwrap_err();

    // Still running at the deadline, so this is a timeout and not a startup failure
    assert!(matches!(err, Error::Timeout { .. }), "got {err}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_utf8_output_keeps_later_lines() {
    let endpoint = free_endpoint();
    let spec = LaunchSpec::new("sh")
        .arg("-c")
        .arg("printf 'caf\\351\\n' >&2; echo 'real cause: port in use' >&2; exit 1");

    let err = gate()
        .ensure_running(&endpoint, &spec, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(1));
    let output = err.captured_output().unwrap();
    assert_eq!(
        output.stream(Stream::Stderr).collect::<Vec<_>>(),
        ["caf\u{FFFD}", "real cause: port in use"]
    );
}
