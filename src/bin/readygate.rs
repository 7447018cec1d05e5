//! readygate CLI
//!
//! Probe, wait for, or bring up a dependent HTTP service from a shell script
//! or a test runner's global setup.
//!
//! ## Usage
//!
//! ```bash
//! # One probe; exit status 0 when healthy
//! readygate probe --url http://127.0.0.1:5000
//!
//! # Wait up to 30s for a service someone else starts
//! readygate wait --url http://127.0.0.1:5000 --deadline 30s
//!
//! # Start the API if it is not up and leave it running; its output goes to
//! # $TMPDIR/readygate-5000.log unless --log-file says otherwise
//! readygate ensure --url http://127.0.0.1:5000 --cwd ../Api \
//!   --env ASPNETCORE_ENVIRONMENT=Development -- dotnet run --no-build
//!
//! # Same, but supervise it until Ctrl+C (which stops it) or until it exits
//! readygate ensure --foreground --url http://127.0.0.1:5000 -- dotnet run
//! ```

use readygate::endpoint::Endpoint;
use readygate::gate::{GateConfig, Readiness, ReadinessGate, ReadinessState, DEFAULT_EXIT_GRACE};
use readygate::launch::{BindVars, LaunchSpec};
use readygate::probe::HttpProbe;
use readygate::telemetry;
use readygate::Error;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::info;

/// Readiness gate for dependent HTTP services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print results as a single JSON line
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a single health probe
    Probe(TargetArgs),
    /// Poll until the service is healthy or the deadline passes
    Wait {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        timing: TimingArgs,
    },
    /// Launch the service unless it is already healthy, then wait for it
    Ensure {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        timing: TimingArgs,
        #[command(flatten)]
        launch: LaunchArgs,
    },
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Base URL of the service
    #[arg(long, env = "READYGATE_URL")]
    url: String,

    /// Health path
    #[arg(long, env = "READYGATE_HEALTH_PATH", default_value = "/health")]
    health_path: String,

    /// Per-request timeout
    #[arg(long, default_value = "2s")]
    probe_timeout: humantime::Duration,

    /// Require this exact health body (e.g. "Healthy")
    #[arg(long, env = "READYGATE_EXPECT_BODY")]
    expect_body: Option<String>,
}

#[derive(Args, Debug)]
struct TimingArgs {
    /// Overall deadline
    #[arg(long, env = "READYGATE_DEADLINE", default_value = "30s")]
    deadline: humantime::Duration,

    /// Delay between probes (minimum 100ms)
    #[arg(long, default_value = "500ms")]
    interval: humantime::Duration,
}

#[derive(Args, Debug)]
struct LaunchArgs {
    /// Working directory of the launched process
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable (KEY=VALUE), repeatable
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Variable receiving the bind host ("" to disable)
    #[arg(long, default_value = "HOST")]
    host_var: String,

    /// Variable receiving the bind port ("" to disable)
    #[arg(long, default_value = "PORT")]
    port_var: String,

    /// Variable receiving the full base URL ("" to disable)
    #[arg(long, default_value = "URLS")]
    urls_var: String,

    /// File receiving the service's output once readygate exits
    /// [default: $TMPDIR/readygate-<port>.log]
    #[arg(long, conflicts_with = "foreground")]
    log_file: Option<PathBuf>,

    /// Stay attached and stop the service on Ctrl+C
    #[arg(long)]
    foreground: bool,

    /// Program and arguments
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

impl TargetArgs {
    fn endpoint(&self) -> Result<Endpoint, Error> {
        Ok(Endpoint::parse(&self.url)?.with_health_path(&self.health_path))
    }

    fn probe(&self) -> Result<HttpProbe, Error> {
        let probe = HttpProbe::with_timeout(self.probe_timeout.into())?;
        Ok(match &self.expect_body {
            Some(body) => probe.expect_body(body.clone()),
            None => probe,
        })
    }
}

impl TimingArgs {
    fn gate(&self, probe: HttpProbe) -> ReadinessGate {
        ReadinessGate::new(
            probe,
            GateConfig {
                poll_interval: self.interval.into(),
                exit_grace: DEFAULT_EXIT_GRACE,
            },
        )
    }
}

impl LaunchArgs {
    fn spec(&self, endpoint: &Endpoint) -> LaunchSpec {
        let non_empty = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());

        let (program, args) = self
            .command
            .split_first()
            .map(|(p, a)| (p.clone(), a.to_vec()))
            .unwrap_or_default();

        let mut spec = LaunchSpec::new(program)
            .args(args)
            .envs(self.env.iter().cloned())
            .bind_vars(BindVars {
                host: non_empty(&self.host_var),
                port: non_empty(&self.port_var),
                urls: non_empty(&self.urls_var),
            })
            .bind_to(endpoint);
        if let Some(dir) = &self.cwd {
            spec = spec.current_dir(dir);
        }
        if !self.foreground {
            let path = self.log_file.clone().unwrap_or_else(|| {
                std::env::temp_dir().join(format!("readygate-{}.log", endpoint.port()))
            });
            spec = spec.log_file(path);
        }
        spec
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init_for_component("readygate", &cli.log_level) {
        eprintln!("{e}");
        return ExitCode::from(1);
    }

    match run(cli.command, cli.json).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("readygate: {e}");
            if let Some(output) = e.captured_output() {
                if !output.is_empty() {
                    eprintln!("--- captured output ---");
                    eprint!("{output}");
                }
            }
            match e.state() {
                ReadinessState::TimedOut => ExitCode::from(2),
                ReadinessState::Failed if !matches!(e, Error::Config(_)) => ExitCode::from(3),
                _ => ExitCode::from(1),
            }
        }
    }
}

async fn run(command: Command, as_json: bool) -> Result<ExitCode, Error> {
    match command {
        Command::Probe(target) => {
            let endpoint = target.endpoint()?;
            let outcome = target.probe()?.check(&endpoint).await;
            if as_json {
                println!("{}", json!({ "url": endpoint.health_url(), "outcome": outcome }));
            } else {
                println!("{}: {:?}", endpoint.health_url(), outcome);
            }
            Ok(if outcome.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Wait { target, timing } => {
            let endpoint = target.endpoint()?;
            let gate = timing.gate(target.probe()?);
            let ready = gate.await_healthy(&endpoint, timing.deadline.into()).await?;
            report(&endpoint, &ready, None, as_json);
            Ok(ExitCode::SUCCESS)
        }
        Command::Ensure {
            target,
            timing,
            launch,
        } => {
            let endpoint = target.endpoint()?;
            let gate = timing.gate(target.probe()?);
            let spec = launch.spec(&endpoint);
            let mut ready = gate
                .ensure_running(&endpoint, &spec, timing.deadline.into())
                .await?;

            let Some(mut process) = ready.process.take() else {
                report(&endpoint, &ready, None, as_json);
                return Ok(ExitCode::SUCCESS);
            };
            report(&endpoint, &ready, process.pid(), as_json);

            if !launch.foreground {
                if let Some(path) = process.log_path() {
                    eprintln!("readygate: service output is written to {}", path.display());
                }
                process.detach();
                return Ok(ExitCode::SUCCESS);
            }

            // Our pipes are the service's stdout/stderr, so stay until it ends.
            tokio::select! {
                status = process.wait() => {
                    let status = status?;
                    info!(status = %status, "Service exited");
                    let code = status.code().unwrap_or(1).clamp(0, 255) as u8;
                    Ok(ExitCode::from(code))
                }
                _ = shutdown_signal() => {
                    process.kill().await?;
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
    }
}

fn report(endpoint: &Endpoint, ready: &Readiness, pid: Option<u32>, as_json: bool) {
    let elapsed_ms = ready.elapsed.as_millis() as u64;
    if as_json {
        println!(
            "{}",
            json!({
                "url": endpoint.base_url(),
                "state": ready.state().as_str(),
                "probes": ready.probes,
                "elapsed_ms": elapsed_ms,
                "pid": pid,
            })
        );
        return;
    }
    match pid {
        Some(pid) => println!(
            "ready {endpoint} pid={pid} probes={} elapsed_ms={elapsed_ms}",
            ready.probes
        ),
        None => println!(
            "ready {endpoint} probes={} elapsed_ms={elapsed_ms}",
            ready.probes
        ),
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
