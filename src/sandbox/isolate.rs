//! Isolate executor
//!
//! Delegates isolation to the external `isolate` tool with cgroup
//! accounting enabled. Each execution allocates a numeric box id, goes
//! through `--init`, `--run`, `--cleanup`, and classifies the verdict from
//! the post-run meta report.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::meta::{parse_meta, IsolateMeta, MetaStatus};
use super::{ExecuteResult, Executor, RunRequest, SandboxError};
use crate::config::IsolateConfig;
use crate::models::Verdict;

const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide box id allocation; wraps around on overflow.
static BOX_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

fn next_box_id() -> u32 {
    BOX_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Host-side temp files backing one box's redirections.
struct BoxFiles {
    stdin: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
    meta: PathBuf,
}

impl BoxFiles {
    fn new(temp_dir: &Path, box_id: u32) -> Self {
        let file = |kind: &str| temp_dir.join(format!("isolate_{box_id}_{kind}.txt"));
        Self {
            stdin: file("stdin"),
            stdout: file("stdout"),
            stderr: file("stderr"),
            meta: file("meta"),
        }
    }

    async fn remove(&self) {
        for path in [&self.stdin, &self.stdout, &self.stderr, &self.meta] {
            let _ = fs::remove_file(path).await;
        }
    }
}

/// Executor backed by the external isolate tool.
pub struct IsolateExecutor {
    config: IsolateConfig,
}

impl IsolateExecutor {
    pub fn new(config: IsolateConfig) -> Self {
        Self { config }
    }

    async fn init_box(&self, box_id: u32) -> Result<(), SandboxError> {
        // Clear any stale box left behind by a previous process.
        let _ = Command::new(&self.config.isolate_path)
            .args([format!("--box-id={box_id}"), "--cleanup".into()])
            .output()
            .await;

        let output = Command::new(&self.config.isolate_path)
            .args([format!("--box-id={box_id}"), "--cg".into(), "--init".into()])
            .output()
            .await
            .map_err(|e| SandboxError::Internal(format!("failed to run isolate --init: {e}")))?;

        if !output.status.success() {
            return Err(SandboxError::Internal(format!(
                "isolate init failed for box {box_id}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(box_id, "initialized isolate box");
        Ok(())
    }

    async fn cleanup_box(&self, box_id: u32) {
        let cleanup = Command::new(&self.config.isolate_path)
            .args([format!("--box-id={box_id}"), "--cleanup".into()])
            .output();
        match timeout(CLEANUP_TIMEOUT, cleanup).await {
            Ok(Ok(output)) if output.status.success() => {
                debug!(box_id, "cleaned up isolate box");
            }
            Ok(Ok(output)) => {
                warn!(
                    box_id,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "isolate cleanup failed"
                );
            }
            Ok(Err(e)) => warn!(box_id, error = %e, "isolate cleanup failed to run"),
            Err(_) => warn!(box_id, "isolate cleanup timed out"),
        }
    }

    fn run_args(&self, box_id: u32, files: &BoxFiles, req: &RunRequest) -> Vec<String> {
        let cpu_limit_sec = req.time_limit_ms as f64 / 1000.0;
        let extra = self.config.extra_time_seconds;
        let wall_limit_sec = (cpu_limit_sec * self.config.wall_time_factor)
            .max(cpu_limit_sec + extra + 1.0);

        let mut args = vec![
            format!("--box-id={box_id}"),
            "--cg".to_string(),
            format!("--cg-mem={}", req.memory_limit_kb),
            format!("--time={cpu_limit_sec:.3}"),
            format!("--wall-time={wall_limit_sec:.3}"),
            format!("--extra-time={extra:.3}"),
            format!("--fsize={}", self.config.fsize_kb),
            format!("--processes={}", self.config.processes),
            format!("--stdin={}", files.stdin.display()),
            format!("--stdout={}", files.stdout.display()),
            format!("--stderr={}", files.stderr.display()),
            format!("--meta={}", files.meta.display()),
            // The workspace is bind-mounted over /box, isolate's default
            // working directory.
            format!("--dir={}:/box:rw", req.working_dir.display()),
            format!("--env=PATH={}", self.config.env_path),
            "--run".to_string(),
            "--".to_string(),
        ];
        args.extend(req.run_command.iter().cloned());
        args
    }

    /// Run the box and classify the outcome from the meta report.
    async fn run_box(
        &self,
        box_id: u32,
        files: &BoxFiles,
        req: &RunRequest,
    ) -> Result<ExecuteResult, SandboxError> {
        let args = self.run_args(box_id, files, req);
        debug!(box_id, ?args, "running isolate");

        let started = Instant::now();
        let mut child = Command::new(&self.config.isolate_path)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Internal(format!("failed to run isolate --run: {e}")))?;

        // Per-test-case host deadline. Isolate enforces its own wall-time
        // cap, but the deadline here fires first at the configured limit.
        let mut deadline_hit = false;
        match timeout(Duration::from_millis(req.time_limit_ms), child.wait()).await {
            Ok(Ok(status)) => {
                // Non-zero exit is expected for TLE/RE/SG runs; the meta
                // report carries the real outcome.
                debug!(box_id, exit = ?status.code(), "isolate run finished");
            }
            Ok(Err(e)) => {
                warn!(box_id, error = %e, "waiting on isolate run failed");
            }
            Err(_) => {
                deadline_hit = true;
                if let Err(e) = child.start_kill() {
                    warn!(box_id, error = %e, "failed to kill isolate on deadline");
                }
                let _ = child.wait().await;
            }
        }

        let stdout = fs::read_to_string(&files.stdout).await.unwrap_or_default();
        let stderr = fs::read_to_string(&files.stderr).await.unwrap_or_default();

        let meta = match fs::read_to_string(&files.meta).await {
            Ok(content) => parse_meta(&content),
            Err(_) if deadline_hit => {
                // Isolate was killed before it could write the report.
                return Ok(ExecuteResult {
                    status: Verdict::TimeLimitExceeded,
                    stdout,
                    stderr,
                    exit_code: -1,
                    time_used_ms: started.elapsed().as_millis() as u64,
                    memory_used_kb: 0,
                });
            }
            Err(e) => {
                return Err(SandboxError::Internal(format!(
                    "failed to read isolate meta file: {e}"
                )));
            }
        };
        debug!(box_id, ?meta, "parsed isolate meta");

        let memory_exceeded = exceeded_memory(&meta, req.memory_limit_kb);
        let mut stderr = stderr;

        let status = if deadline_hit {
            Verdict::TimeLimitExceeded
        } else {
            match meta.status {
                MetaStatus::TimeOut => Verdict::TimeLimitExceeded,
                MetaStatus::Signaled | MetaStatus::RuntimeError => {
                    if memory_exceeded {
                        Verdict::MemoryLimitExceeded
                    } else {
                        if meta.exit_code == 0 && stderr.is_empty() {
                            // Signal or RE status with a zero exit code is
                            // anomalous; leave a trace for the submitter.
                            stderr = format!(
                                "exited with status {:?} but exit code 0",
                                meta.status
                            );
                        }
                        Verdict::RuntimeError
                    }
                }
                MetaStatus::InternalError => {
                    return Err(SandboxError::Internal(format!(
                        "isolate internal error: {}",
                        meta.message
                    )));
                }
                MetaStatus::Ok | MetaStatus::Other => {
                    if meta.exit_code == 0 {
                        // A run can finish normally and still have tripped
                        // the cgroup limit.
                        if memory_exceeded {
                            Verdict::MemoryLimitExceeded
                        } else {
                            Verdict::Success
                        }
                    } else {
                        Verdict::RuntimeError
                    }
                }
            }
        };

        Ok(ExecuteResult {
            status,
            stdout,
            stderr,
            exit_code: meta.exit_code,
            time_used_ms: meta.time_ms,
            memory_used_kb: meta.cg_mem_kb,
        })
    }
}

fn exceeded_memory(meta: &IsolateMeta, memory_limit_kb: u64) -> bool {
    meta.oom_killed
        || (memory_limit_kb > 0 && meta.cg_mem_kb > 0 && meta.cg_mem_kb > memory_limit_kb)
}

#[async_trait]
impl Executor for IsolateExecutor {
    async fn execute(&self, req: RunRequest) -> Result<ExecuteResult, SandboxError> {
        let box_id = next_box_id();
        debug!(
            box_id,
            submission_id = %req.submission_id,
            test_case_id = %req.test_case_id,
            "starting isolate execution"
        );

        let files = BoxFiles::new(&self.config.temp_dir(), box_id);
        if let Err(e) = fs::write(&files.stdin, &req.input).await {
            files.remove().await;
            return Err(SandboxError::Internal(format!(
                "failed to write stdin temp file: {e}"
            )));
        }

        if let Err(e) = self.init_box(box_id).await {
            files.remove().await;
            return Err(e);
        }

        let result = self.run_box(box_id, &files, &req).await;

        // Cleanup runs on every exit path; a cleanup failure never
        // overrides the run's outcome.
        self.cleanup_box(box_id).await;
        files.remove().await;

        if let Ok(result) = &result {
            debug!(
                box_id,
                submission_id = %req.submission_id,
                test_case_id = %req.test_case_id,
                status = %result.status,
                time_used_ms = result.time_used_ms,
                memory_used_kb = result.memory_used_kb,
                "isolate execution finished"
            );
        }
        result
    }

    fn id(&self) -> &'static str {
        "isolate_executor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest {
            submission_id: "sub".into(),
            test_case_id: "tc".into(),
            run_command: vec!["./main".into()],
            working_dir: PathBuf::from("/tmp/ws"),
            input: String::new(),
            time_limit_ms: 1500,
            memory_limit_kb: 65536,
        }
    }

    #[test]
    fn test_run_args_carry_limits_and_redirections() {
        let executor = IsolateExecutor::new(IsolateConfig::default());
        let files = BoxFiles::new(Path::new("/tmp"), 7);
        let args = executor.run_args(7, &files, &request());

        assert!(args.contains(&"--box-id=7".to_string()));
        assert!(args.contains(&"--cg".to_string()));
        assert!(args.contains(&"--cg-mem=65536".to_string()));
        assert!(args.contains(&"--time=1.500".to_string()));
        // wall = max(1.5 * 2.0, 1.5 + 2.0 + 1.0) = 4.5
        assert!(args.contains(&"--wall-time=4.500".to_string()));
        assert!(args.contains(&"--extra-time=2.000".to_string()));
        assert!(args.contains(&"--stdin=/tmp/isolate_7_stdin.txt".to_string()));
        assert!(args.contains(&"--meta=/tmp/isolate_7_meta.txt".to_string()));
        assert!(args.contains(&"--dir=/tmp/ws:/box:rw".to_string()));

        // The user command comes after the `--` separator.
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1], "./main");
    }

    #[test]
    fn test_wall_time_floor_applies_to_short_limits() {
        let executor = IsolateExecutor::new(IsolateConfig::default());
        let files = BoxFiles::new(Path::new("/tmp"), 1);
        let mut req = request();
        req.time_limit_ms = 200;
        let args = executor.run_args(1, &files, &req);

        // 0.2 * 2.0 = 0.4 is below the 0.2 + 2.0 + 1.0 floor.
        assert!(args.contains(&"--wall-time=3.200".to_string()));
    }

    #[test]
    fn test_box_ids_are_distinct() {
        let a = next_box_id();
        let b = next_box_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_memory_check_prefers_oom_flag() {
        let mut meta = IsolateMeta::default();
        meta.oom_killed = true;
        assert!(exceeded_memory(&meta, 0));

        let mut meta = IsolateMeta::default();
        meta.cg_mem_kb = 70000;
        assert!(exceeded_memory(&meta, 65536));
        assert!(!exceeded_memory(&meta, 0));
    }
}
