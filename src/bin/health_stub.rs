//! Health stub service
//!
//! Stands in for a dependent service during readiness tests: it binds to
//! `HOST`/`PORT` like the real services do, answers `/health` with
//! `Unhealthy` until its startup delay has passed, and can be told to crash.
//!
//! ```bash
//! HOST=127.0.0.1 PORT=43141 cargo run --bin health-stub -- --startup-delay 2s
//! ```

use readygate::stub::{self, StubState};
use readygate::telemetry;

use clap::Parser;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Health stub service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind host
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Time before /health turns healthy (e.g. "2s", "500ms")
    #[arg(long, default_value = "0s")]
    startup_delay: humantime::Duration,

    /// Exit after this long instead of serving forever
    #[arg(long)]
    exit_after: Option<humantime::Duration>,

    /// Exit code used with --exit-after
    #[arg(long, default_value = "1")]
    exit_code: i32,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    telemetry::init_for_component("health-stub", &args.log_level)?;

    if let Some(after) = args.exit_after {
        let after: Duration = after.into();
        let code = args.exit_code;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            warn!(exit_code = code, "Simulated crash");
            eprintln!("health-stub: simulated crash, exiting with code {code}");
            std::process::exit(code);
        });
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    let addr = listener.local_addr()?;

    let delay: Duration = args.startup_delay.into();
    let state = StubState::ready_after(delay);

    println!("Now listening on: http://{}", addr);
    info!(
        addr = %addr,
        startup_delay_ms = delay.as_millis() as u64,
        "Health stub ready"
    );

    axum::serve(listener, stub::router(state)).await?;

    Ok(())
}
