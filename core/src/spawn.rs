//! Subprocess session manager.
//!
//! Spawns backend CLIs with a sanitized environment, streams stdout in
//! bounded chunks under a per-read soft deadline and an overall
//! wall-clock timeout, and kills the whole process group on timeout so
//! backends that fork helpers do not leak children. A PTY variant covers
//! backends that probe `isatty` before producing output.

use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::error::QuorumErr;
use crate::error::Result;

/// Size of one stdout read.
const CHUNK_SIZE: usize = 1024;

/// Soft deadline for a single read before re-checking liveness.
pub const READ_DEADLINE: Duration = Duration::from_millis(250);

/// Grace period for reaping an exited child.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment overrides that keep CLI backends in plain-text mode.
pub fn sanitized_env() -> Vec<(&'static str, &'static str)> {
    vec![
        ("TERM", "dumb"),
        ("NO_COLOR", "1"),
        ("CI", "1"),
        ("FORCE_COLOR", "0"),
    ]
}

/// What to spawn and how long to let it run.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment entries layered over the sanitized base.
    pub env: Vec<(String, String)>,
    /// Overall wall-clock budget.
    pub timeout: Duration,
    /// Per-read soft deadline.
    pub read_deadline: Duration,
}

impl SpawnConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
            timeout,
            read_deadline: READ_DEADLINE,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A spawned child streamed chunk by chunk.
#[derive(Debug)]
pub struct ChildSession {
    child: Child,
    stdout: ChildStdout,
    deadline: Instant,
    timeout: Duration,
    read_deadline: Duration,
}

impl ChildSession {
    /// Spawn `config.command` in its own process group.
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in sanitized_env() {
            command.env(key, value);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                QuorumErr::NotAvailable(format!("{} not found in PATH", config.command))
            } else {
                QuorumErr::Backend(format!("failed to spawn {}: {e}", config.command))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| QuorumErr::Internal("child stdout not captured".into()))?;

        debug!(command = %config.command, pid = child.id(), "spawned backend process");

        Ok(Self {
            child,
            stdout,
            deadline: Instant::now() + config.timeout,
            timeout: config.timeout,
            read_deadline: config.read_deadline,
        })
    }

    /// Next raw stdout chunk, `None` at EOF.
    ///
    /// Returns [`QuorumErr::Timeout`] once the wall-clock budget is
    /// spent; the child and its process group are killed and reaped
    /// before the error is returned.
    pub async fn next_chunk(&mut self) -> Result<Option<String>> {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                self.kill_group().await;
                return Err(QuorumErr::Timeout(self.timeout));
            }

            let slice = self.read_deadline.min(self.deadline - now);
            match tokio::time::timeout(slice, self.stdout.read(&mut buf)).await {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => {
                    return Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()));
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    // Soft deadline passed without data. If the child is
                    // gone the pipe is drained; otherwise keep waiting
                    // until the wall clock runs out.
                    if let Ok(Some(_)) = self.child.try_wait() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Wait for exit and collect stderr. Call after EOF.
    pub async fn finish(mut self) -> Result<(i32, String)> {
        let mut stderr_buf = Vec::new();
        if let Some(mut stderr) = self.child.stderr.take() {
            // Bounded: a hung stderr must not outlive the reap budget.
            let _ = tokio::time::timeout(REAP_TIMEOUT, stderr.read_to_end(&mut stderr_buf)).await;
        }

        let status = tokio::time::timeout(REAP_TIMEOUT, self.child.wait())
            .await
            .map_err(|_| QuorumErr::Timeout(REAP_TIMEOUT))??;

        Ok((
            status.code().unwrap_or(-1),
            String::from_utf8_lossy(&stderr_buf).into_owned(),
        ))
    }

    /// Kill the child and its process group, then reap.
    pub async fn kill_group(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // The child was spawned as its own group leader; negative
            // semantics are handled by killpg itself.
            unsafe {
                libc::killpg(pid as i32, libc::SIGKILL);
            }
        }
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill backend process");
        }
        let _ = tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await;
    }
}

impl Drop for ChildSession {
    fn drop(&mut self) {
        // `kill_on_drop` reaps the direct child; the group kill covers
        // helpers the backend forked. After a normal `finish` the pid is
        // gone and this is a no-op.
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::killpg(pid as i32, libc::SIGKILL);
            }
        }
    }
}

/// A child running under a pseudo-terminal.
///
/// Needed for backends that refuse to stream without a TTY. The caller
/// sees the same chunk-iterator surface as [`ChildSession`]; reads are
/// bridged from the blocking PTY reader through a channel.
pub struct PtySession {
    rx: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    killer: Box<dyn portable_pty::ChildKiller + Send + Sync>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    deadline: Instant,
    timeout: Duration,
    read_deadline: Duration,
}

impl PtySession {
    /// Spawn `config.command` attached to a fresh PTY.
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        use portable_pty::CommandBuilder;
        use portable_pty::PtySize;
        use portable_pty::native_pty_system;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| QuorumErr::Internal(format!("openpty failed: {e}")))?;

        let mut builder = CommandBuilder::new(&config.command);
        builder.args(&config.args);
        for (key, value) in sanitized_env() {
            builder.env(key, value);
        }
        for (key, value) in &config.env {
            builder.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| QuorumErr::Backend(format!("failed to spawn {}: {e}", config.command)))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| QuorumErr::Internal(format!("pty reader: {e}")))?;

        let (tx, rx) = mpsc::channel(16);
        // The PTY reader is blocking; pump it from a blocking task and
        // let channel close semantics propagate EOF and cancellation.
        tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });

        let killer = child.clone_killer();

        Ok(Self {
            rx,
            killer,
            child,
            deadline: Instant::now() + config.timeout,
            timeout: config.timeout,
            read_deadline: config.read_deadline,
        })
    }

    /// Next raw output chunk, `None` at EOF. Same timeout contract as
    /// [`ChildSession::next_chunk`].
    pub async fn next_chunk(&mut self) -> Result<Option<String>> {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                self.kill();
                return Err(QuorumErr::Timeout(self.timeout));
            }

            let slice = self.read_deadline.min(self.deadline - now);
            match tokio::time::timeout(slice, self.rx.recv()).await {
                Ok(Some(Ok(bytes))) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Ok(None),
                Err(_) => {
                    if let Ok(Some(_)) = self.child.try_wait() {
                        // Drain whatever the pump already queued.
                        match self.rx.try_recv() {
                            Ok(Ok(bytes)) => {
                                return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                            }
                            _ => return Ok(None),
                        }
                    }
                }
            }
        }
    }

    /// Kill the child. The reader pump exits on EOF.
    pub fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            warn!(error = %e, "failed to kill pty child");
        }
        let _ = self.child.try_wait();
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.killer.kill();
        }
    }
}
