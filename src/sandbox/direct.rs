//! Direct host executor
//!
//! Launches the run command as a plain subprocess on the host, with no
//! isolation. Memory is accounted by polling the child's resident set size;
//! the time limit is enforced by killing the child at the deadline. Unsafe
//! for untrusted code; this backend exists for development setups.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{ExecuteResult, Executor, RunRequest, SandboxError};
use crate::models::Verdict;

const MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Aborts the watcher task when dropped, so the watcher stops even when
/// the whole execution future is cancelled mid-run.
struct WatcherGuard(tokio::task::JoinHandle<()>);

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Executor that runs commands directly on the host.
pub struct DirectExecutor;

impl DirectExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirectExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for DirectExecutor {
    async fn execute(&self, req: RunRequest) -> Result<ExecuteResult, SandboxError> {
        if req.run_command.is_empty() {
            return Err(SandboxError::Internal("empty run command".into()));
        }

        debug!(
            submission_id = %req.submission_id,
            test_case_id = %req.test_case_id,
            command = ?req.run_command,
            time_limit_ms = req.time_limit_ms,
            memory_limit_kb = req.memory_limit_kb,
            "starting direct execution"
        );

        let mut cmd = Command::new(&req.run_command[0]);
        cmd.args(&req.run_command[1..])
            .current_dir(&req.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(SandboxError::CommandStart)?;
        let pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            let input = req.input.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "stdin write failed; program may have exited");
                }
                // Dropping the handle closes the pipe, signalling EOF.
            });
        }

        let mut stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        // Watcher task: track peak RSS and flag a memory overrun. The main
        // task and the watcher race on the peak; fetch_max keeps it exact.
        let peak_rss_kb = Arc::new(AtomicU64::new(0));
        let mle_observed = Arc::new(AtomicBool::new(false));
        let limit_hit = Arc::new(Notify::new());
        let watcher = pid.map(|pid| {
            let peak = Arc::clone(&peak_rss_kb);
            let flag = Arc::clone(&mle_observed);
            let notify = Arc::clone(&limit_hit);
            let limit_kb = req.memory_limit_kb;
            WatcherGuard(tokio::spawn(async move {
                let mut tick = tokio::time::interval(MEMORY_POLL_INTERVAL);
                loop {
                    tick.tick().await;
                    // Read failures are transient or mean the process is
                    // gone; either way keep polling until told to stop.
                    let Some(rss_kb) = read_rss_kb(pid).await else {
                        continue;
                    };
                    peak.fetch_max(rss_kb, Ordering::Relaxed);
                    if limit_kb > 0 && rss_kb > limit_kb {
                        debug!(pid, rss_kb, limit_kb, "memory limit exceeded; killing process");
                        flag.store(true, Ordering::Relaxed);
                        notify.notify_one();
                        return;
                    }
                }
            }))
        });

        let mut timed_out = false;
        let mut mem_killed = false;
        let wait_result = tokio::select! {
            res = child.wait() => res,
            _ = sleep(Duration::from_millis(req.time_limit_ms)), if req.time_limit_ms > 0 => {
                timed_out = true;
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill process on timeout");
                }
                child.wait().await
            }
            _ = limit_hit.notified() => {
                mem_killed = true;
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill process on memory overrun");
                }
                child.wait().await
            }
        };
        drop(watcher);

        let time_used_ms = started.elapsed().as_millis() as u64;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let memory_exceeded = mem_killed || mle_observed.load(Ordering::Relaxed);

        // Verdict priority: MLE > TLE > RuntimeError > Success.
        let (mut status, exit_code) = match wait_result {
            Ok(exit) => {
                let exit_code = exit.code().unwrap_or(-1);
                if memory_exceeded {
                    (Verdict::MemoryLimitExceeded, exit_code)
                } else if timed_out {
                    (Verdict::TimeLimitExceeded, exit_code)
                } else if exit.success() {
                    (Verdict::Success, 0)
                } else {
                    // Non-zero exit and signal deaths both classify here.
                    (Verdict::RuntimeError, exit_code)
                }
            }
            Err(e) => {
                if memory_exceeded {
                    (Verdict::MemoryLimitExceeded, -1)
                } else if timed_out {
                    (Verdict::TimeLimitExceeded, -1)
                } else {
                    return Err(SandboxError::CommandWait(e));
                }
            }
        };

        // The deadline arm may not have fired yet even though the program
        // overran its limit (scheduling slack); upgrade to TLE here.
        if req.time_limit_ms > 0
            && time_used_ms > req.time_limit_ms
            && !memory_exceeded
            && status != Verdict::TimeLimitExceeded
        {
            debug!(
                time_used_ms,
                time_limit_ms = req.time_limit_ms,
                "observed time exceeded limit; upgrading to TLE"
            );
            status = Verdict::TimeLimitExceeded;
        }

        let result = ExecuteResult {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            time_used_ms,
            memory_used_kb: peak_rss_kb.load(Ordering::Relaxed),
        };

        debug!(
            submission_id = %req.submission_id,
            test_case_id = %req.test_case_id,
            status = %result.status,
            time_used_ms = result.time_used_ms,
            memory_used_kb = result.memory_used_kb,
            "direct execution finished"
        );

        Ok(result)
    }

    fn id(&self) -> &'static str {
        "direct_executor"
    }
}

/// Resident set size of a process in KB, from `/proc/<pid>/status`.
async fn read_rss_kb(pid: u32) -> Option<u64> {
    let status = tokio::fs::read_to_string(format!("/proc/{pid}/status"))
        .await
        .ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            return rest.split_whitespace().next()?.parse().ok();
        }
    }
    None
}
