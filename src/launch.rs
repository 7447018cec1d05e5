//! Launching dependent services as subprocesses
//!
//! A [`LaunchSpec`] describes the process; [`LaunchSpec::spawn`] starts it with
//! piped output and hands back a [`ManagedProcess`]. Two reader tasks drain
//! stdout and stderr into an [`OutputBuffer`] owned by that one launch.

use crate::endpoint::Endpoint;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default byte budget for captured output
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;
/// Longer lines are cut; the rest of the line is discarded
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Environment variable names that carry the bind address into the child.
///
/// `None` disables a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindVars {
    pub host: Option<String>,
    pub port: Option<String>,
    /// Full base URL, the way ASP.NET reads `ASPNETCORE_URLS`
    pub urls: Option<String>,
}

impl Default for BindVars {
    fn default() -> Self {
        Self {
            host: Some("HOST".to_string()),
            port: Some("PORT".to_string()),
            urls: Some("URLS".to_string()),
        }
    }
}

/// Everything needed to start a dependent service
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    bind_vars: BindVars,
    output_limit: usize,
    log_file: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: BTreeMap::new(),
            bind_vars: BindVars::default(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
            log_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory; defaults to the invoking process's directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Layer one variable on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Rename or disable the bind variables written by [`LaunchSpec::bind_to`].
    pub fn bind_vars(mut self, vars: BindVars) -> Self {
        self.bind_vars = vars;
        self
    }

    /// Byte budget for captured output (oldest lines are dropped first).
    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Append the child's stdout and stderr to `path` instead of piping them.
    ///
    /// The child then keeps a valid output target after this process exits;
    /// captured output is read back from the file.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Point the child's bind address at `endpoint`.
    pub fn bind_to(mut self, endpoint: &Endpoint) -> Self {
        let vars = self.bind_vars.clone();
        if let Some(key) = vars.host {
            self.env.insert(key, endpoint.host().to_string());
        }
        if let Some(key) = vars.port {
            self.env.insert(key, endpoint.port().to_string());
        }
        if let Some(key) = vars.urls {
            self.env.insert(key, endpoint.base_url());
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Start the process with piped output.
    ///
    /// The child is not killed when the returned handle is dropped.
    pub fn spawn(&self) -> Result<ManagedProcess> {
        info!(
            program = %self.program,
            args = ?self.args,
            cwd = ?self.current_dir,
            "Launching dependent service"
        );

        let (stdout, stderr, log) = match &self.log_file {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                let log = LogTail {
                    path: path.clone(),
                    offset: file.metadata()?.len(),
                };
                let err_file = file.try_clone()?;
                (Stdio::from(file), Stdio::from(err_file), Some(log))
            }
            None => (Stdio::piped(), Stdio::piped(), None),
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| Error::Launch {
            program: self.program.clone(),
            source,
        })?;

        let output = OutputBuffer::new(self.output_limit);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(output.capture(stdout, Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(output.capture(stderr, Stream::Stderr));
        }

        let pid = child.id();
        info!(program = %self.program, pid = ?pid, "Dependent service launched");

        Ok(ManagedProcess {
            program: self.program.clone(),
            pid,
            child,
            output,
            readers,
            log,
        })
    }
}

/// A spawned dependent service.
///
/// Dropping the handle leaves the process running; call [`ManagedProcess::kill`]
/// to tear it down.
pub struct ManagedProcess {
    program: String,
    pid: Option<u32>,
    child: Child,
    output: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
    log: Option<LogTail>,
}

impl ManagedProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Snapshot of the output captured so far.
    pub fn output(&self) -> CapturedOutput {
        match &self.log {
            Some(log) => log.read(self.output.limit()),
            None => self.output.snapshot(),
        }
    }

    /// Path of the log file, when launched with [`LaunchSpec::log_file`].
    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.log.as_ref().map(|l| l.path.as_path())
    }

    /// Release the handle and leave the process running; returns its pid.
    ///
    /// Piped output is drained by tasks on the current runtime. Once that
    /// runtime shuts down, further writes from the child fail (SIGPIPE on
    /// unix). A process that must outlive the runtime should be launched with
    /// [`LaunchSpec::log_file`].
    pub fn detach(self) -> Option<u32> {
        info!(
            program = %self.program,
            pid = ?self.pid,
            log_file = ?self.log_path(),
            "Detaching from dependent service"
        );
        self.pid
    }

    /// Non-blocking exit check.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) -> Result<()> {
        info!(program = %self.program, pid = ?self.pid, "Stopping dependent service");
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already exited and reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Wait up to `grace` for the readers to hit EOF, then snapshot the output.
    pub(crate) async fn drain_output(&mut self, grace: Duration) -> CapturedOutput {
        let readers = std::mem::take(&mut self.readers);
        if !readers.is_empty() {
            let joined = tokio::time::timeout(grace, futures::future::join_all(readers)).await;
            if joined.is_err() {
                debug!(program = %self.program, "Output readers still open after exit grace period");
            }
        }
        self.output()
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .finish()
    }
}

/// Which stream a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
    /// Both streams interleaved in a log file
    Log,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
            Stream::Log => "log",
        }
    }
}

/// One line of child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// Immutable snapshot of captured output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub lines: Vec<OutputLine>,
    /// Lines evicted to stay within the byte budget
    pub dropped_lines: usize,
}

impl CapturedOutput {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// True if any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.text.contains(needle))
    }

    /// Lines from one stream only.
    pub fn stream(&self, stream: Stream) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(move |l| l.stream == stream)
            .map(|l| l.text.as_str())
    }
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dropped_lines > 0 {
            writeln!(f, "[{} earlier lines dropped]", self.dropped_lines)?;
        }
        for line in &self.lines {
            writeln!(f, "[{}] {}", line.stream.as_str(), line.text)?;
        }
        Ok(())
    }
}

/// Output accumulator shared by the reader tasks of a single launch
#[derive(Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

struct BufferInner {
    lines: VecDeque<OutputLine>,
    bytes: usize,
    limit: usize,
    dropped: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferInner {
                lines: VecDeque::new(),
                bytes: 0,
                limit,
                dropped: 0,
            })),
        }
    }

    /// Append a line, evicting the oldest lines beyond the byte budget.
    pub fn push(&self, stream: Stream, text: String) {
        let mut inner = self.inner.lock();
        inner.bytes += text.len();
        inner.lines.push_back(OutputLine { stream, text });
        while inner.bytes > inner.limit && inner.lines.len() > 1 {
            if let Some(old) = inner.lines.pop_front() {
                inner.bytes -= old.text.len();
                inner.dropped += 1;
            }
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.lock().limit
    }

    pub fn snapshot(&self) -> CapturedOutput {
        let inner = self.inner.lock();
        CapturedOutput {
            lines: inner.lines.iter().cloned().collect(),
            dropped_lines: inner.dropped,
        }
    }

    fn capture<R>(&self, reader: R, stream: Stream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = self.clone();
        tokio::spawn(async move {
            // Reading continues until EOF; stopping early would break the child's pipe.
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut truncated = false;
            loop {
                buf.clear();
                let read = (&mut reader)
                    .take(MAX_LINE_BYTES as u64)
                    .read_until(b'\n', &mut buf)
                    .await;
                match read {
                    Ok(0) => break,
                    Ok(_) => {
                        if !truncated {
                            buffer.push(stream, decode_line(&buf));
                        }
                        truncated = buf.last() != Some(&b'\n');
                    }
                    Err(e) => {
                        debug!(stream = stream.as_str(), error = %e, "Stopped reading child output");
                        break;
                    }
                }
            }
        })
    }
}

/// Strip the line terminator and replace invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Output of a child launched with [`LaunchSpec::log_file`]
#[derive(Debug, Clone)]
struct LogTail {
    path: PathBuf,
    /// File length at launch; earlier content belongs to previous runs
    offset: u64,
}

impl LogTail {
    fn read(&self, limit: usize) -> CapturedOutput {
        let buffer = OutputBuffer::new(limit);
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let start = usize::try_from(self.offset).unwrap_or(usize::MAX).min(bytes.len());
                for line in bytes[start..].split_inclusive(|b| *b == b'\n') {
                    let line = &line[..line.len().min(MAX_LINE_BYTES)];
                    buffer.push(Stream::Log, decode_line(line));
                }
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Could not read service log file");
            }
        }
        buffer.snapshot()
    }
}
