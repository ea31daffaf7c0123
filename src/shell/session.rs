//! Persistent shell session - one long-lived interpreter driven over stdin
//!
//! Commands are written to the interpreter's stdin followed by an `echo` of a sentinel
//! token on both stdout and stderr. Two reader tasks forward every line into one
//! channel, and the wait loop polls that channel in short slices until the sentinel
//! shows up, the process exits, or the deadline passes. Output from both streams is
//! interleaved in arrival order.
//!
//! ```text
//!   run("cd src && ls")
//!        │
//!        ▼
//!   stdin ◄── "cd src && ls\necho '<sentinel>'; echo '<sentinel>' >&2\n"
//!
//!   stdout ──reader task──┐
//!                         ├──► mpsc ──► wait loop (100ms slices)
//!   stderr ──reader task──┘                 │
//!                                           ├─ sentinel seen  → return output
//!                                           ├─ process exited → drain, return output
//!                                           └─ deadline       → kill group, return output + notice
//! ```
//!
//! The interpreter runs in its own process group so a timeout or `close()` also takes
//! down whatever the command started.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::CommandRunner;
use crate::metrics::{SHELL_COMMAND_DURATION, SHELL_TIMEOUTS};

/// How long `close()` waits after SIGTERM before escalating to SIGKILL
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on draining buffered output once the process has exited
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// How long to wait for the second sentinel once the first has arrived
const SENTINEL_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn index(self) -> usize {
        match self {
            Stream::Stdout => 0,
            Stream::Stderr => 1,
        }
    }
}

enum ShellEvent {
    Line(Stream, String),
    Eof(Stream),
}

/// Configuration for spawning a persistent shell
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Interpreter to run (e.g., "/bin/bash")
    pub program: String,
    /// Extra arguments for the interpreter
    pub args: Vec<String>,
    /// Working directory, created if missing
    pub workdir: PathBuf,
    /// Fixed sentinel token (a random one is generated if None)
    pub sentinel: Option<String>,
    /// Slice length of the wait loop
    pub poll_interval: Duration,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "/bin/bash".to_string(),
            args: Vec::new(),
            workdir: PathBuf::from("./workspace"),
            sentinel: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ShellConfig {
    pub fn with_workdir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Self::default()
        }
    }
}

/// Lifecycle of the interpreter process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Running,
    /// The process ended on its own (e.g., the command was `exit`)
    Exited,
    /// Killed after a command exceeded its timeout
    TimedOut,
    Closed,
}

impl fmt::Display for ShellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShellState::Running => "running",
            ShellState::Exited => "exited",
            ShellState::TimedOut => "killed after timeout",
            ShellState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Error type for shell operations
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("Failed to create working directory {}: {source}", path.display())]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to spawn shell '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Shell process is missing its {0} pipe")]
    MissingPipe(&'static str),
    #[error("Sentinel must be non-empty and free of quotes and newlines")]
    InvalidSentinel,
    #[error("Shell is not running ({0})")]
    NotRunning(ShellState),
    #[error("Failed to write command to shell: {0}")]
    Write(#[source] std::io::Error),
}

/// Output of one command
#[derive(Debug, Clone)]
pub struct ShellOutput {
    /// Interleaved stdout/stderr, trimmed, sentinel removed
    pub output: String,
    /// The command exceeded its timeout and the shell was killed
    pub timed_out: bool,
    /// The shell process exited while running the command
    pub exited: bool,
    pub duration: Duration,
}

/// A long-lived interpreter process
pub struct PersistentShell {
    config: ShellConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    events: mpsc::UnboundedReceiver<ShellEvent>,
    readers: Vec<JoinHandle<()>>,
    /// Whether [stdout, stderr] are still open
    open: [bool; 2],
    sentinel: String,
    state: ShellState,
}

impl PersistentShell {
    /// Spawn the interpreter described by `config`
    pub fn spawn(config: ShellConfig) -> Result<Self, ShellError> {
        let sentinel = match &config.sentinel {
            Some(s) if s.is_empty() || s.contains(['\'', '\n', '\r']) => {
                return Err(ShellError::InvalidSentinel)
            }
            Some(s) => s.clone(),
            None => format!("__CLAWMINI_DONE_{}__", Uuid::now_v7().simple()),
        };

        std::fs::create_dir_all(&config.workdir).map_err(|source| ShellError::Workdir {
            path: config.workdir.clone(),
            source,
        })?;

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .current_dir(&config.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ShellError::Spawn {
            program: config.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(ShellError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ShellError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ShellError::MissingPipe("stderr"))?;

        let (tx, events) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_line_reader(Stream::Stdout, stdout, tx.clone()),
            spawn_line_reader(Stream::Stderr, stderr, tx),
        ];

        info!(
            program = %config.program,
            workdir = %config.workdir.display(),
            pid = child.id(),
            "Persistent shell started"
        );

        Ok(Self {
            config,
            child: Some(child),
            stdin: Some(stdin),
            events,
            readers,
            open: [true, true],
            sentinel,
            state: ShellState::Running,
        })
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn workdir(&self) -> &Path {
        &self.config.workdir
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Whether the interpreter can still take commands
    pub fn is_alive(&mut self) -> bool {
        if self.state != ShellState::Running {
            return false;
        }
        let exited = match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => true,
        };
        if exited {
            self.state = ShellState::Exited;
        }
        !exited
    }

    /// Run one command and collect its output
    ///
    /// # Arguments
    /// * `command` - Shell source to run; state changes (cd, export) persist
    /// * `timeout` - Deadline for the sentinel to appear
    ///
    /// # Returns
    /// ShellOutput with interleaved stdout/stderr. After a timeout the shell is
    /// killed and every further call fails with `NotRunning`.
    pub async fn run(&mut self, command: &str, timeout: Duration) -> Result<ShellOutput, ShellError> {
        if !self.is_alive() {
            return Err(ShellError::NotRunning(self.state));
        }

        let mut stale = 0usize;
        while let Ok(event) = self.events.try_recv() {
            match event {
                ShellEvent::Line(..) => stale += 1,
                ShellEvent::Eof(stream) => self.open[stream.index()] = false,
            }
        }
        if stale > 0 {
            debug!(lines = stale, "Discarded output left over from a previous command");
        }

        let script = format!(
            "{}\necho '{sentinel}'; echo '{sentinel}' >&2\n",
            command,
            sentinel = self.sentinel
        );
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(ShellError::NotRunning(self.state))?;
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(ShellError::Write)?;
        stdin.flush().await.map_err(ShellError::Write)?;

        let start = Instant::now();
        let mut output = String::new();
        // Sentinel still expected on [stdout, stderr]; a closed stream owes nothing.
        let mut pending = self.open;
        let mut first_sentinel_at: Option<Instant> = None;

        let result = loop {
            if start.elapsed() > timeout {
                warn!(timeout_secs = timeout.as_secs_f64(), "Command timed out, killing shell");
                self.terminate(Signal::SIGKILL).await;
                self.state = ShellState::TimedOut;
                SHELL_TIMEOUTS.inc();
                output.push_str(&format!(
                    "\n[Error: Command timed out after {}s]",
                    timeout.as_secs_f64()
                ));
                break ShellOutput {
                    output,
                    timed_out: true,
                    exited: false,
                    duration: start.elapsed(),
                };
            }

            // The command may have redirected one stream away for good.
            if first_sentinel_at.is_some_and(|at| at.elapsed() > SENTINEL_GRACE) {
                break self.finish(output, false, start);
            }

            match tokio::time::timeout(self.config.poll_interval, self.events.recv()).await {
                Ok(Some(ShellEvent::Line(stream, line))) => {
                    if line.contains(&self.sentinel) {
                        output.push_str(&line.replace(&self.sentinel, ""));
                        pending[stream.index()] = false;
                        first_sentinel_at.get_or_insert_with(Instant::now);
                        if pending.iter().all(|p| !p) {
                            break self.finish(output, false, start);
                        }
                    } else {
                        output.push_str(&line);
                    }
                }
                Ok(Some(ShellEvent::Eof(stream))) => {
                    self.open[stream.index()] = false;
                    pending[stream.index()] = false;
                    if self.open.iter().all(|o| !o) {
                        self.reap().await;
                        break self.finish(output, true, start);
                    }
                    if first_sentinel_at.is_some() && pending.iter().all(|p| !p) {
                        break self.finish(output, false, start);
                    }
                }
                // Both readers are gone: the interpreter is gone.
                Ok(None) => {
                    self.reap().await;
                    break self.finish(output, true, start);
                }
                Err(_) => {
                    let exited = self
                        .child
                        .as_mut()
                        .map(|c| !matches!(c.try_wait(), Ok(None)))
                        .unwrap_or(true);
                    if exited {
                        self.drain_into(&mut output).await;
                        self.reap().await;
                        break self.finish(output, true, start);
                    }
                }
            }
        };

        SHELL_COMMAND_DURATION.observe(result.duration.as_secs_f64());
        debug!(
            duration_ms = result.duration.as_secs_f64() * 1000.0,
            timed_out = result.timed_out,
            exited = result.exited,
            output_len = result.output.len(),
            "Shell command finished"
        );
        Ok(result)
    }

    /// Terminate the interpreter and release its pipes. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.state == ShellState::Closed {
            return;
        }
        // EOF on stdin lets an idle interpreter exit on its own.
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Some(pid) = child.id() {
                    signal_group(pid, Signal::SIGTERM);
                }
                if tokio::time::timeout(CLOSE_GRACE, child.wait()).await.is_err() {
                    if let Some(pid) = child.id() {
                        signal_group(pid, Signal::SIGKILL);
                    }
                    let _ = child.wait().await;
                }
            }
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.state = ShellState::Closed;
        info!(workdir = %self.config.workdir.display(), "Persistent shell closed");
    }

    /// Replace this shell with a fresh one from the same config
    pub async fn restart(&mut self) -> Result<(), ShellError> {
        self.close().await;
        let mut config = self.config.clone();
        config.sentinel = Some(self.sentinel.clone());
        *self = Self::spawn(config)?;
        Ok(())
    }

    fn finish(&mut self, output: String, exited: bool, start: Instant) -> ShellOutput {
        let mut output = output;
        if exited {
            output = output.replace(&self.sentinel, "");
            self.state = ShellState::Exited;
        }
        ShellOutput {
            output: output.trim().to_string(),
            timed_out: false,
            exited,
            duration: start.elapsed(),
        }
    }

    async fn drain_into(&mut self, output: &mut String) {
        let deadline = Instant::now() + DRAIN_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.events.recv()).await {
                Ok(Some(ShellEvent::Line(_, line))) => output.push_str(&line),
                Ok(Some(ShellEvent::Eof(stream))) => self.open[stream.index()] = false,
                _ => break,
            }
        }
    }

    async fn reap(&mut self) {
        self.stdin.take();
        if let Some(child) = self.child.as_mut() {
            let _ = child.wait().await;
        }
    }

    async fn terminate(&mut self, signal: Signal) {
        self.stdin.take();
        if let Some(child) = self.child.as_mut() {
            if let Some(pid) = child.id() {
                signal_group(pid, signal);
            }
            let _ = child.wait().await;
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for PersistentShell {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Some(pid) = child.id() {
                    signal_group(pid, Signal::SIGKILL);
                }
            }
        }
    }
}

#[async_trait]
impl CommandRunner for PersistentShell {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<ShellOutput, ShellError> {
        PersistentShell::run(self, command, timeout).await
    }

    fn is_alive(&mut self) -> bool {
        PersistentShell::is_alive(self)
    }

    async fn restart(&mut self) -> Result<(), ShellError> {
        PersistentShell::restart(self).await
    }

    async fn close(&mut self) {
        PersistentShell::close(self).await
    }
}

/// Forward every line of `pipe` into `tx`, then report EOF
fn spawn_line_reader<R>(
    stream: Stream,
    pipe: R,
    tx: mpsc::UnboundedSender<ShellEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(ShellEvent::Line(stream, line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(?stream, error = %e, "Shell output reader stopped");
                    break;
                }
            }
        }
        let _ = tx.send(ShellEvent::Eof(stream));
    })
}

/// Signal the whole process group led by `pid`
fn signal_group(pid: u32, signal: Signal) {
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!(pid, signal = %signal, error = %e, "Failed to signal shell process group");
    }
}
