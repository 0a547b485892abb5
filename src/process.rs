use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

use crate::domain::Artifact;
use crate::error::ProcessError;
use crate::resources::ResourceSession;

/// One external process invocation: command, bounded input, wall-clock
/// timeout.
#[derive(Clone, Debug)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: String,
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        ProcessSpec {
            program: program.into(),
            args: vec![],
            stdin: String::new(),
            timeout,
            cwd: None,
        }
    }

    pub fn for_artifact(artifact: &Artifact, stdin: impl Into<String>, timeout: Duration) -> Self {
        let (program, args) = artifact.command();
        ProcessSpec {
            program,
            args,
            stdin: stdin.into(),
            timeout,
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Captured outcome of a process run. A timeout is reported in-band so
/// pipelines can attribute it ("too slow" vs "crashed").
#[derive(Clone, Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Peak resident set size sampled while the process ran, in MB.
    /// `None` when the process exited before the first sample or the
    /// platform exposes no per-pid accounting.
    pub peak_memory_mb: Option<f64>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns processes on the tokio runtime with every child registered in
/// the run's [`ResourceSession`]. A stop request cancels the session token,
/// which kills the child here rather than waiting out the timeout.
#[derive(Debug)]
pub struct TokioProcessRunner {
    session: Arc<ResourceSession>,
}

impl TokioProcessRunner {
    pub fn new(session: Arc<ResourceSession>) -> Self {
        TokioProcessRunner { session }
    }
}

#[async_trait::async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        if self.session.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let program = spec.program.display().to_string();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| spawn_error(&program, e))?;
        let _guard = child.id().map(|pid| self.session.register_process(pid));
        let (peak_kb, sampler) = spawn_memory_sampler(child.id());

        // Feed stdin from a separate task so a child that emits output
        // before draining its input cannot deadlock us.
        if let Some(mut handle) = child.stdin.take() {
            let payload = spec.stdin.into_bytes();
            tokio::spawn(async move {
                let _ = handle.write_all(&payload).await;
                let _ = handle.shutdown().await;
            });
        }

        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());

        let token = self.session.cancellation_token();
        let waited = tokio::select! {
            status = timeout(spec.timeout, child.wait()) => status,
            _ = token.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                if let Some(sampler) = sampler {
                    sampler.abort();
                }
                tracing::debug!(program, "process killed by stop request");
                return Err(ProcessError::Cancelled);
            }
        };
        if let Some(sampler) = sampler {
            sampler.abort();
        }

        let (status, timed_out) = match waited {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                return Err(ProcessError::Io {
                    program,
                    msg: e.to_string(),
                });
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                tracing::debug!(program, timeout_ms = spec.timeout.as_millis() as u64, "process timed out");
                (None, true)
            }
        };

        let elapsed = start.elapsed();
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = status.and_then(|s| s.code()).unwrap_or(-1);
        let peak_memory_mb = match peak_kb.load(Ordering::Relaxed) {
            0 => None,
            kb => Some(kb as f64 / 1024.0),
        };

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
            elapsed,
            timed_out,
            peak_memory_mb,
        })
    }
}

/// Polls the child's peak resident set size while it runs. Sampling is
/// advisory; a process that exits between samples just reports `None`.
fn spawn_memory_sampler(pid: Option<u32>) -> (Arc<AtomicU64>, Option<JoinHandle<()>>) {
    let peak = Arc::new(AtomicU64::new(0));
    let sampler = pid.map(|pid| {
        let peak = Arc::clone(&peak);
        tokio::spawn(async move {
            loop {
                if let Some(kb) = peak_rss_kb(pid) {
                    peak.fetch_max(kb, Ordering::Relaxed);
                }
                tokio::time::sleep(SAMPLE_INTERVAL).await;
            }
        })
    });
    (peak, sampler)
}

const SAMPLE_INTERVAL: Duration = Duration::from_millis(25);

/// `VmHWM` from `/proc/<pid>/status` is the kernel's own high-water mark,
/// so the poll interval only bounds how late we read it, not its accuracy.
#[cfg(target_os = "linux")]
fn peak_rss_kb(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn peak_rss_kb(_pid: u32) -> Option<u64> {
    None
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn spawn_error(program: &str, e: std::io::Error) -> ProcessError {
    match e.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound(program.to_string()),
        std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied(program.to_string()),
        _ => ProcessError::Spawn {
            program: program.to_string(),
            msg: e.to_string(),
        },
    }
}
