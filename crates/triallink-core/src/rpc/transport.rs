//! Process transport - line-delimited I/O over a spawned child's stdio
//!
//! The transport owns the child process exclusively. Readiness is not
//! assumed after spawn; the caller establishes it with a handshake
//! round-trip. Stderr is drained on a side task into a bounded ring so a
//! chatty child can never block the request path.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::{Result, RpcError};

/// Lines of child stderr retained for diagnostics.
const STDERR_RING_CAPACITY: usize = 200;

/// How to launch the external program.
#[derive(Clone, Default)]
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overlaid onto the inherited environment; overrides win on collision.
    /// Values are treated as credentials and never logged in full.
    pub env: HashMap<String, String>,
}

impl std::fmt::Debug for SpawnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &redact_env(&self.env))
            .finish()
    }
}

/// Render env as key=<set, N bytes> so secrets never land in logs.
pub(crate) fn redact_env(env: &HashMap<String, String>) -> Vec<String> {
    let mut keys: Vec<String> = env
        .iter()
        .map(|(k, v)| format!("{}=<set, {} bytes>", k, v.len()))
        .collect();
    keys.sort();
    keys
}

/// Raw line read/write over a child's stdio. The seam exists so the
/// dispatcher can be exercised against an in-memory pair in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append a newline and flush immediately; the child reads one line per
    /// request, so buffering must not delay delivery.
    async fn write_line(&self, line: &str) -> Result<()>;

    /// Block until a full line is available (`Some`), the stream closes
    /// (`None`), or the deadline elapses (`ReadTimeout`). Partial lines are
    /// never returned.
    async fn read_line(&self, deadline: Option<Duration>) -> Result<Option<String>>;

    /// Graceful teardown: signal termination, wait up to `grace`, then kill.
    /// Always reaps. Idempotent.
    async fn stop(&self, grace: Duration);

    /// Last lines of child stderr, oldest first.
    fn stderr_tail(&self) -> Vec<String>;
}

/// Transport over a spawned child process.
#[derive(Debug)]
pub struct ProcessTransport {
    command: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<BufReader<ChildStdout>>,
    stderr_ring: Arc<parking_lot::Mutex<VecDeque<String>>>,
    stderr_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ProcessTransport {
    /// Launch the external program with stdio piped. Fails with `Launch` if
    /// the executable cannot be found or spawned.
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        debug!(
            command = %config.command,
            args = ?config.args,
            env = ?redact_env(&config.env),
            "spawning tool server process"
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| RpcError::Launch {
            command: config.command.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| RpcError::Internal {
            reason: "child spawned without stdin pipe".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| RpcError::Internal {
            reason: "child spawned without stdout pipe".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| RpcError::Internal {
            reason: "child spawned without stderr pipe".to_string(),
        })?;

        // Drain stderr continuously so the child can never block on it.
        let stderr_ring = Arc::new(parking_lot::Mutex::new(VecDeque::new()));
        let ring = stderr_ring.clone();
        let drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut ring = ring.lock();
                if ring.len() >= STDERR_RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(line);
            }
        });

        debug!(pid = ?pid, "tool server process started");

        Ok(Self {
            command: config.command.clone(),
            pid,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout)),
            stderr_ring,
            stderr_task: parking_lot::Mutex::new(Some(drain)),
        })
    }

    /// Process id of the child, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn read_line_inner(&self) -> Result<Option<String>> {
        let mut stdout = self.stdout.lock().await;
        let mut buf = String::new();
        let n = stdout
            .read_line(&mut buf)
            .await
            .map_err(|_| self.closed_error())?;
        if n == 0 {
            return Ok(None);
        }
        // A chunk without a terminator means the stream died mid-line;
        // partial lines are never surfaced.
        if !buf.ends_with('\n') {
            debug!(command = %self.command, "discarding partial line at end of stream");
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    fn closed_error(&self) -> RpcError {
        RpcError::TransportClosed {
            stderr_tail: self.stderr_tail(),
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or_else(|| self.closed_error())?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| self.closed_error())?;
        stdin.write_all(b"\n").await.map_err(|_| self.closed_error())?;
        stdin.flush().await.map_err(|_| self.closed_error())?;
        Ok(())
    }

    async fn read_line(&self, deadline: Option<Duration>) -> Result<Option<String>> {
        match deadline {
            None => self.read_line_inner().await,
            Some(limit) => match timeout(limit, self.read_line_inner()).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::ReadTimeout {
                    elapsed_ms: limit.as_millis() as u64,
                }),
            },
        }
    }

    async fn stop(&self, grace: Duration) {
        // Closing stdin is the termination signal for a line protocol: the
        // child sees EOF and is expected to exit on its own.
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return; // already stopped
        };

        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(command = %self.command, %status, "tool server exited");
            }
            Ok(Err(e)) => {
                warn!(command = %self.command, error = %e, "failed waiting for tool server");
            }
            Err(_) => {
                warn!(
                    command = %self.command,
                    grace_ms = grace.as_millis() as u64,
                    "tool server did not exit within grace period, killing"
                );
                let _ = child.start_kill();
                // Reap unconditionally so no zombie is left behind.
                match child.wait().await {
                    Ok(status) => debug!(command = %self.command, %status, "tool server killed"),
                    Err(e) => warn!(command = %self.command, error = %e, "failed to reap tool server"),
                }
            }
        }

        if let Some(task) = self.stderr_task.lock().take() {
            task.abort();
        }
    }

    fn stderr_tail(&self) -> Vec<String> {
        self.stderr_ring.lock().iter().cloned().collect()
    }
}
