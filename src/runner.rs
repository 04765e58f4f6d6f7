//! Submission runner
//!
//! Orchestrates one submission end to end: workspace setup, source write,
//! the host-side compile step, the sequential per-test-case execution loop,
//! output comparison, and result publishing. Exactly one result is
//! published per test case; a failed compile step fans out as a
//! `CompileError` result for every test case.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, error, info, warn};

use crate::checker::outputs_match;
use crate::config::RunnerConfig;
use crate::models::{Submission, SubmissionResult, Verdict};
use crate::sandbox::{Executor, RunRequest};

const DEFAULT_BINARY_FILE: &str = "executable";

/// Egress seam for per-test-case results. Publish failures are the
/// publisher's to report; the runner logs them and moves on.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, result: &SubmissionResult) -> Result<()>;
}

/// Per-submission workspace directory, removed recursively when dropped so
/// cleanup runs on every exit path.
struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn create(base: &Path, submission_id: &str) -> std::io::Result<Self> {
        let dir = base.join(submission_id);
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o755);
        }
        builder.create(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir.display(), "removed workspace"),
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "failed to remove workspace"),
        }
    }
}

/// Orchestrates compilation and execution for submissions.
pub struct Runner {
    executor: Arc<dyn Executor>,
    publisher: Arc<dyn ResultPublisher>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(
        executor: Arc<dyn Executor>,
        publisher: Arc<dyn ResultPublisher>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            executor,
            publisher,
            config,
        }
    }

    /// Process one submission, publishing one result per test case. The
    /// deadline is the submission-wide cutoff; test cases not started
    /// before it are published as `InternalError` placeholders.
    pub async fn process_submission(&self, submission: &Submission, deadline: Instant) {
        info!(
            submission_id = %submission.id,
            language = %submission.language.id,
            test_cases = submission.test_cases.len(),
            "processing submission"
        );

        let workspace = match Workspace::create(&self.config.sandbox_base_dir, &submission.id) {
            Ok(ws) => ws,
            Err(e) => {
                error!(submission_id = %submission.id, error = %e, "failed to create workspace");
                self.publish_for_all(
                    submission,
                    Verdict::InternalError,
                    "failed to create sandbox workspace",
                )
                .await;
                return;
            }
        };

        let source_path = workspace.path().join(&submission.language.source_file);
        if let Err(e) = write_source(&source_path, &submission.code).await {
            error!(submission_id = %submission.id, error = %e, "failed to write source file");
            self.publish_for_all(submission, Verdict::InternalError, "failed to write source code")
                .await;
            return;
        }
        debug!(path = %source_path.display(), "source code written");

        // Interpreted languages run the source file itself.
        let mut executable_path = source_path.clone();

        if submission.language.needs_compile() {
            let binary_file = submission
                .language
                .binary_file
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_BINARY_FILE.to_string());
            let output_path = workspace.path().join(binary_file);

            let compile_command = submission.language.compile_command.as_deref().unwrap_or("");
            let argv = render_template(
                compile_command,
                &[
                    ("{source_file}", &source_path.to_string_lossy()),
                    ("{output_file}", &output_path.to_string_lossy()),
                    ("{temp_dir}", &workspace.path().to_string_lossy()),
                ],
            );

            match self.compile(submission, &argv, workspace.path()).await {
                CompileOutcome::Success => {
                    debug!(
                        submission_id = %submission.id,
                        executable = %output_path.display(),
                        "compilation successful"
                    );
                    executable_path = output_path;
                }
                CompileOutcome::Failure(compile_output) => {
                    info!(submission_id = %submission.id, "compilation failed");
                    self.publish_for_all(submission, Verdict::CompileError, &compile_output)
                        .await;
                    return;
                }
            }
        }

        let run_argv = render_template(
            &submission.language.run_command,
            &[
                ("{executable}", &executable_path.to_string_lossy()),
                ("{source_file}", &source_path.to_string_lossy()),
                ("{temp_dir}", &workspace.path().to_string_lossy()),
            ],
        );
        debug!(submission_id = %submission.id, command = ?run_argv, "prepared run command");

        for (idx, test_case) in submission.test_cases.iter().enumerate() {
            if Instant::now() >= deadline {
                warn!(
                    submission_id = %submission.id,
                    skipped = submission.test_cases.len() - idx,
                    "submission deadline exceeded; skipping remaining test cases"
                );
                self.publish_deadline_placeholders(submission, idx).await;
                break;
            }

            let request = RunRequest {
                submission_id: submission.id.clone(),
                test_case_id: test_case.id.clone(),
                run_command: run_argv.clone(),
                working_dir: workspace.path().to_path_buf(),
                input: test_case.input.clone(),
                time_limit_ms: submission.time_limit_in_ms,
                memory_limit_kb: submission.memory_limit_in_kb,
            };

            // The submission deadline races the sandbox call itself;
            // dropping the cancelled execute future kills the child.
            let executed = match timeout_at(deadline.into(), self.executor.execute(request)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        submission_id = %submission.id,
                        test_case_id = %test_case.id,
                        "submission deadline exceeded mid-execution; cancelling"
                    );
                    self.publish_deadline_placeholders(submission, idx).await;
                    break;
                }
            };

            let result = match executed {
                Ok(exec) => {
                    let status = if exec.status == Verdict::Success {
                        if outputs_match(&exec.stdout, &test_case.expected_output, &submission.settings)
                        {
                            Verdict::Success
                        } else {
                            Verdict::WrongAnswer
                        }
                    } else {
                        exec.status
                    };
                    SubmissionResult {
                        submission_id: submission.id.clone(),
                        test_case_id: test_case.id.clone(),
                        status,
                        time_used_in_ms: exec.time_used_ms,
                        memory_used_in_kb: exec.memory_used_kb,
                        output: exec.stdout,
                        error: exec.stderr,
                    }
                }
                Err(e) => {
                    error!(
                        submission_id = %submission.id,
                        test_case_id = %test_case.id,
                        error = %e,
                        "sandbox execution failed"
                    );
                    SubmissionResult {
                        submission_id: submission.id.clone(),
                        test_case_id: test_case.id.clone(),
                        status: Verdict::InternalError,
                        time_used_in_ms: 0,
                        memory_used_in_kb: 0,
                        output: String::new(),
                        error: format!("sandbox execution failed: {e}"),
                    }
                }
            };

            info!(
                submission_id = %submission.id,
                test_case_id = %test_case.id,
                status = %result.status,
                time_used_ms = result.time_used_in_ms,
                memory_used_kb = result.memory_used_in_kb,
                "test case finished"
            );
            // No early abort: every test case gets its own result.
            self.publish_result(result).await;
        }

        info!(submission_id = %submission.id, "finished processing submission");
    }

    /// Run the compile command on the host (not in the sandbox) under the
    /// compilation deadline, capturing combined stdout and stderr.
    async fn compile(
        &self,
        submission: &Submission,
        argv: &[String],
        workspace: &Path,
    ) -> CompileOutcome {
        if argv.is_empty() {
            return CompileOutcome::Failure("empty compile command".into());
        }
        debug!(submission_id = %submission.id, command = ?argv, "compiling");

        let compile_deadline = Duration::from_secs(self.config.compilation_timeout_sec);
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(workspace)
            .kill_on_drop(true)
            .output();

        match timeout(compile_deadline, output).await {
            Ok(Ok(output)) if output.status.success() => CompileOutcome::Success,
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                CompileOutcome::Failure(combined)
            }
            Ok(Err(e)) => CompileOutcome::Failure(format!("failed to launch compiler: {e}")),
            Err(_) => CompileOutcome::Failure("compilation timed out".into()),
        }
    }

    /// Publish an `InternalError` placeholder for the test case at
    /// `start_idx` and every one after it, so a deadline abort still yields
    /// one result per test case.
    async fn publish_deadline_placeholders(&self, submission: &Submission, start_idx: usize) {
        for test_case in &submission.test_cases[start_idx..] {
            self.publish_result(SubmissionResult {
                submission_id: submission.id.clone(),
                test_case_id: test_case.id.clone(),
                status: Verdict::InternalError,
                time_used_in_ms: 0,
                memory_used_in_kb: 0,
                output: String::new(),
                error: "submission deadline exceeded".into(),
            })
            .await;
        }
    }

    /// Fan out one status to every test case of the submission. Used for
    /// compile errors and for host-side failures before the run loop.
    async fn publish_for_all(&self, submission: &Submission, status: Verdict, error: &str) {
        for test_case in &submission.test_cases {
            self.publish_result(SubmissionResult {
                submission_id: submission.id.clone(),
                test_case_id: test_case.id.clone(),
                status,
                time_used_in_ms: 0,
                memory_used_in_kb: 0,
                output: String::new(),
                error: error.to_string(),
            })
            .await;
        }
    }

    async fn publish_result(&self, result: SubmissionResult) {
        if let Err(e) = self.publisher.publish(&result).await {
            // Fire and forget: the result is lost, the submission goes on.
            error!(
                submission_id = %result.submission_id,
                test_case_id = %result.test_case_id,
                error = %e,
                "failed to publish result"
            );
        }
    }
}

async fn write_source(path: &Path, code: &str) -> std::io::Result<()> {
    tokio::fs::write(path, code).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

/// Split a command template into shell words and substitute placeholders.
/// Substitution is literal and per-token: values are never re-split, and
/// unknown placeholders are left as-is.
fn render_template(template: &str, substitutions: &[(&str, &str)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|token| {
            let mut token = token.to_string();
            for (placeholder, value) in substitutions {
                token = token.replace(placeholder, value);
            }
            token
        })
        .collect()
}

enum CompileOutcome {
    Success,
    /// Combined compiler output, or the launch/timeout error text.
    Failure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template_substitutes_placeholders() {
        let argv = render_template(
            "gcc -o {output_file} {source_file}",
            &[
                ("{source_file}", "/ws/main.c"),
                ("{output_file}", "/ws/main"),
            ],
        );
        assert_eq!(argv, vec!["gcc", "-o", "/ws/main", "/ws/main.c"]);
    }

    #[test]
    fn test_render_template_keeps_unknown_placeholders() {
        let argv = render_template("run {mystery} {source_file}", &[("{source_file}", "a.py")]);
        assert_eq!(argv, vec!["run", "{mystery}", "a.py"]);
    }

    #[test]
    fn test_render_template_does_not_resplit_values() {
        let argv = render_template(
            "{executable}",
            &[("{executable}", "/dir with space/bin")],
        );
        assert_eq!(argv, vec!["/dir with space/bin"]);
    }

    #[test]
    fn test_render_template_substitutes_inside_tokens() {
        let argv = render_template("python3 {temp_dir}/main.py", &[("{temp_dir}", "/ws")]);
        assert_eq!(argv, vec!["python3", "/ws/main.py"]);
    }
}
