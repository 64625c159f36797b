//! Service child process with piped diagnostics
//!
//! stdout and stderr are read line by line on background tasks and forwarded
//! into one bounded channel, so the harness can race diagnostics against
//! readiness polling and stream reads. A reader blocks when the channel is
//! full, which in turn stalls the service on its pipe.

use crate::error::{Error, Result};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxfit_common::config::ServiceConfig;

/// Lines buffered between the reader tasks and the harness
pub const LINE_BUFFER: usize = 256;

/// Stream a diagnostic line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSource {
    Stdout,
    Stderr,
}

impl fmt::Display for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineSource::Stdout => write!(f, "stdout"),
            LineSource::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of service output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLine {
    pub source: LineSource,
    pub text: String,
}

/// Running service process
pub struct ServiceProcess {
    child: Child,
    /// None once both output streams have closed
    lines: Option<mpsc::Receiver<ServiceLine>>,
}

impl ServiceProcess {
    /// Launch the service described by `config`
    pub fn spawn(config: &ServiceConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            warn!(program = %config.program, error = %e, "Failed to spawn service process");
            Error::Io(e)
        })?;
        info!(program = %config.program, pid = ?child.id(), "Service process started");

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, LineSource::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, LineSource::Stderr, tx);
        }

        Ok(Self {
            child,
            lines: Some(rx),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next diagnostic line.
    ///
    /// Returns None once, when both streams close; after that it never
    /// resolves, so it can sit in a `select!` without spinning.
    pub async fn next_line(&mut self) -> Option<ServiceLine> {
        let Some(lines) = self.lines.as_mut() else {
            return std::future::pending().await;
        };
        let line = lines.recv().await;
        if line.is_none() {
            debug!("Service output closed");
            self.lines = None;
        }
        line
    }

    /// Lines already buffered, without waiting. At most `LINE_BUFFER`.
    pub fn pending_lines(&mut self) -> Vec<ServiceLine> {
        let mut pending = Vec::new();
        if let Some(lines) = self.lines.as_mut() {
            while pending.len() < LINE_BUFFER {
                match lines.try_recv() {
                    Ok(line) => pending.push(line),
                    Err(_) => break,
                }
            }
        }
        pending
    }

    /// Kill the process and wait up to `grace` for it to be reaped.
    ///
    /// Returns the exit status when the process was reaped in time.
    pub async fn terminate(mut self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(%status, "Service already exited");
            return Some(status);
        }

        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill service process: {}", e);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "Service process terminated");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for service process: {}", e);
                None
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs_f64(), "Service process did not exit in time");
                None
            }
        }
    }
}

fn spawn_reader<R>(stream: R, source: LineSource, tx: mpsc::Sender<ServiceLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::new();

        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    // Diagnostics are not guaranteed to be UTF-8
                    let text = String::from_utf8_lossy(&raw).trim_end().to_string();
                    if tx.send(ServiceLine { source, text }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(%source, "Service output read failed: {}", e);
                    break;
                }
            }
        }
    });
}
