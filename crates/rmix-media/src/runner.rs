//! Subprocess runner for pipeline stages.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::command::{Stage, StageInvocation};
use crate::error::{MediaError, MediaResult};

/// Bytes of stderr kept for diagnostics.
pub const DEFAULT_STDERR_TAIL_BYTES: usize = 4096;

const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executes one stage invocation.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run the invocation to completion. On success the declared output
    /// exists; on failure it does not.
    async fn run(&self, invocation: &StageInvocation) -> MediaResult<()>;
}

/// Runs stage invocations as real subprocesses.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    timeout: Option<Duration>,
    stderr_tail_bytes: usize,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            timeout: None,
            stderr_tail_bytes: DEFAULT_STDERR_TAIL_BYTES,
        }
    }

    /// Kill the stage if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stderr_tail(mut self, bytes: usize) -> Self {
        self.stderr_tail_bytes = bytes.max(1);
        self
    }

    async fn wait(&self, child: &mut Child, stage: Stage) -> MediaResult<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(stage = %stage, "Stage timed out after {:?}, killing process", timeout);
                if let Err(e) = child.kill().await {
                    warn!(stage = %stage, "Failed to kill timed out process: {}", e);
                }
                Err(MediaError::Timeout {
                    stage,
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl StageRunner for FfmpegRunner {
    async fn run(&self, invocation: &StageInvocation) -> MediaResult<()> {
        let stage = invocation.stage;
        debug!(stage = %stage, "Running: {}", invocation.command_line());
        let started = Instant::now();

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::SpawnFailed {
                program: invocation.program.clone(),
                source,
            })?;

        let stderr = child.stderr.take();
        let tail_bytes = self.stderr_tail_bytes;
        let mut tail_task = tokio::spawn(async move {
            match stderr {
                Some(stderr) => read_tail(stderr, tail_bytes).await,
                None => String::new(),
            }
        });

        let waited = self.wait(&mut child, stage).await;

        // A grandchild may still hold the pipe open after a kill.
        let diagnostics = match tokio::time::timeout(STDERR_DRAIN_GRACE, &mut tail_task).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(_)) => String::new(),
            Err(_) => {
                tail_task.abort();
                String::new()
            }
        };

        let result = match waited {
            Ok(status) if status.success() => {
                if tokio::fs::try_exists(&invocation.output).await.unwrap_or(false) {
                    Ok(())
                } else {
                    Err(MediaError::MissingOutput {
                        stage,
                        path: invocation.output.clone(),
                    })
                }
            }
            Ok(status) => Err(MediaError::stage_failed(stage, status.code(), diagnostics)),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => debug!(stage = %stage, "Stage finished in {:.2?}", started.elapsed()),
            Err(e) => {
                metrics::counter!("rmix_stage_failures_total", "stage" => stage.as_str()).increment(1);
                warn!(stage = %stage, "Stage failed after {:.2?}: {}", started.elapsed(), e);
                remove_partial_output(invocation).await;
            }
        }

        result
    }
}

/// Read a stream to the end, keeping only its last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail: VecDeque<u8> = VecDeque::with_capacity(limit.min(64 * 1024));
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend(&buf[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
        }
    }

    String::from_utf8_lossy(tail.make_contiguous()).trim().to_string()
}

async fn remove_partial_output(invocation: &StageInvocation) {
    match tokio::fs::remove_file(&invocation.output).await {
        Ok(()) => debug!(stage = %invocation.stage, "Removed partial output {}", invocation.output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            stage = %invocation.stage,
            "Failed to remove partial output {}: {}",
            invocation.output.display(),
            e
        ),
    }
}

/// Locate a binary on PATH (or verify an explicit path).
pub fn check_binary(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::BinaryNotFound {
        program: program.to_string(),
    })
}
