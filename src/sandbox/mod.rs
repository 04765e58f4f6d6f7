//! Sandbox abstraction
//!
//! A unified interface over the execution backends:
//! - `DirectExecutor`: runs the command as a plain host subprocess
//!   (development only, no isolation)
//! - `IsolateExecutor`: delegates to the external `isolate` tool with
//!   cgroup-based accounting
//!
//! The sandbox layer does NOT:
//! - Compile code (the runner drives compilation on the host)
//! - Compare outputs or map Success onto WrongAnswer
//! - Know about the bus or result publishing

pub mod direct;
pub mod isolate;
pub mod meta;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RunnerConfig;
use crate::models::Verdict;

pub use direct::DirectExecutor;
pub use isolate::IsolateExecutor;

/// Which backend executes submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxType {
    Direct,
    Isolate,
    /// Reserved; selecting it fails the factory.
    Firejail,
}

/// Everything a backend needs to run one prepared program against one
/// test-case input.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub submission_id: String,
    pub test_case_id: String,
    /// Command and arguments, already template-substituted.
    pub run_command: Vec<String>,
    /// Host directory the command runs in (the submission workspace).
    pub working_dir: PathBuf,
    /// Test-case input, fed to the program's stdin.
    pub input: String,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
}

/// Outcome of one sandboxed execution. `status` never carries
/// `CompileError` or `WrongAnswer`; those are decided outside the sandbox.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub status: Verdict,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub time_used_ms: u64,
    pub memory_used_kb: u64,
}

/// Host-side sandbox failures. These are never user-code failures: a user
/// program that crashes or overruns its limits is reported through
/// `ExecuteResult`, not through this error.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The process could not be launched at all.
    #[error("failed to start command: {0}")]
    CommandStart(#[source] std::io::Error),
    /// Waiting on the process failed in a way not attributable to the user
    /// program.
    #[error("command wait failed: {0}")]
    CommandWait(#[source] std::io::Error),
    /// Backend setup, cleanup, or report parsing failed.
    #[error("sandbox internal error: {0}")]
    Internal(String),
}

/// A prepared-program execution environment.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the request's command inside the backend, enforcing its resource
    /// limits, and report resource usage.
    async fn execute(&self, req: RunRequest) -> Result<ExecuteResult, SandboxError>;

    /// Stable identifier for this backend, used in logs.
    fn id(&self) -> &'static str;
}

/// Build the executor selected by the runner configuration.
///
/// An unimplemented backend is a startup-time error rather than a handle
/// that fails on first submission.
pub fn new_executor(cfg: &RunnerConfig) -> anyhow::Result<Arc<dyn Executor>> {
    match cfg.sandbox_type {
        SandboxType::Direct => Ok(Arc::new(DirectExecutor::new())),
        SandboxType::Isolate => Ok(Arc::new(IsolateExecutor::new(cfg.isolate.clone()))),
        SandboxType::Firejail => {
            anyhow::bail!("firejail sandbox is not implemented; set runner.sandboxType to \"direct\" or \"isolate\"")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;

    #[test]
    fn test_sandbox_type_wire_form() {
        assert_eq!(
            serde_yaml::from_str::<SandboxType>("direct").unwrap(),
            SandboxType::Direct
        );
        assert_eq!(
            serde_yaml::from_str::<SandboxType>("isolate").unwrap(),
            SandboxType::Isolate
        );
        assert!(serde_yaml::from_str::<SandboxType>("docker").is_err());
    }

    #[test]
    fn test_factory_rejects_firejail() {
        let cfg = RunnerConfig {
            sandbox_type: SandboxType::Firejail,
            ..RunnerConfig::default()
        };
        let err = match new_executor(&cfg) {
            Err(e) => e,
            Ok(_) => panic!("expected firejail sandbox type to be rejected"),
        };
        assert!(err.to_string().contains("firejail"));
    }

    #[test]
    fn test_factory_builds_known_backends() {
        let cfg = RunnerConfig::default();
        assert_eq!(new_executor(&cfg).unwrap().id(), "direct_executor");

        let cfg = RunnerConfig {
            sandbox_type: SandboxType::Isolate,
            ..RunnerConfig::default()
        };
        assert_eq!(new_executor(&cfg).unwrap().id(), "isolate_executor");
    }
}
