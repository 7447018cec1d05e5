//! Error types for readygate

use crate::gate::ReadinessState;
use crate::launch::CapturedOutput;
use std::fmt;
use std::time::Duration;

/// Result type alias for readygate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for readygate
#[derive(Debug)]
pub enum Error {
    /// Deadline elapsed before the target reported healthy
    Timeout { elapsed: Duration, probes: u32 },
    /// Launched process exited before the target reported healthy
    Startup {
        exit_code: Option<i32>,
        output: CapturedOutput,
    },
    /// Process could not be spawned at all
    Launch {
        program: String,
        source: std::io::Error,
    },
    /// A named service failed during bootstrap
    Service { name: String, source: Box<Error> },
    /// Configuration errors
    Config(String),
    /// IO errors
    Io(std::io::Error),
}

impl Error {
    /// Terminal readiness state this error reports.
    pub fn state(&self) -> ReadinessState {
        match self {
            Error::Timeout { .. } => ReadinessState::TimedOut,
            Error::Service { source, .. } => source.state(),
            _ => ReadinessState::Failed,
        }
    }

    /// Exit code of a process that died during startup, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Startup { exit_code, .. } => *exit_code,
            Error::Service { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    /// Output captured from the launched process, if the error carries it.
    pub fn captured_output(&self) -> Option<&CapturedOutput> {
        match self {
            Error::Startup { output, .. } => Some(output),
            Error::Service { source, .. } => source.captured_output(),
            _ => None,
        }
    }

    pub(crate) fn for_service(self, name: &str) -> Self {
        Error::Service {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Launch { source, .. } => Some(source),
            Error::Service { source, .. } => Some(source.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout { elapsed, probes } => write!(
                f,
                "Service not healthy after {}ms ({} probes)",
                elapsed.as_millis(),
                probes
            ),
            Error::Startup { exit_code, output } => {
                match exit_code {
                    Some(code) => write!(f, "Process exited with code {} before becoming healthy", code)?,
                    None => write!(f, "Process terminated by signal before becoming healthy")?,
                }
                if !output.is_empty() {
                    write!(f, " ({} lines of output captured)", output.len())?;
                }
                Ok(())
            }
            Error::Launch { program, source } => {
                write!(f, "Failed to launch '{}': {}", program, source)
            }
            Error::Service { name, source } => write!(f, "Service '{}': {}", name, source),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Config(format!("invalid endpoint URL: {}", e))
    }
}
