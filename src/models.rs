//! Submission and result data model
//!
//! Wire types for the submission ingress payload and the per-test-case
//! result egress payload, plus the verdict enum. Field names on the wire are
//! camelCase, matching the orchestrator's payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Final classification of a single test-case execution.
///
/// `Running` is a transient placeholder used while an execution is in
/// flight; it is never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    WrongAnswer,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InternalError,
    Running,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Success => "success",
            Verdict::WrongAnswer => "wrong_answer",
            Verdict::CompileError => "compile_error",
            Verdict::RuntimeError => "runtime_error",
            Verdict::TimeLimitExceeded => "time_limit_exceeded",
            Verdict::MemoryLimitExceeded => "memory_limit_exceeded",
            Verdict::InternalError => "internal_error",
            Verdict::Running => "running",
        };
        write!(f, "{}", s)
    }
}

/// One code+tests+limits unit delivered to the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub language: Language,
    pub code: String,
    pub time_limit_in_ms: u64,
    pub memory_limit_in_kb: u64,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub settings: SubmissionSettings,
}

/// Language descriptor, delivered inline on each submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    #[serde(default)]
    pub id: String,
    /// Filename the source code is written into.
    pub source_file: String,
    /// Output artifact name for compiled languages.
    #[serde(default)]
    pub binary_file: Option<String>,
    /// Compile command template; absent or empty for interpreted languages.
    #[serde(default)]
    pub compile_command: Option<String>,
    /// Run command template.
    pub run_command: String,
}

impl Language {
    /// Whether this language needs a compile step before running.
    pub fn needs_compile(&self) -> bool {
        self.compile_command
            .as_deref()
            .is_some_and(|cmd| !cmd.trim().is_empty())
    }
}

/// One (input, expected output) pair within a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub input: String,
    #[serde(default, rename = "expectOutput")]
    pub expected_output: String,
}

/// Output-comparison policy for a submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SubmissionSettings {
    #[serde(default, rename = "withTrim")]
    pub trim: bool,
    #[serde(default, rename = "withCaseSensitive")]
    pub case_sensitive: bool,
    #[serde(default, rename = "withWhitespace")]
    pub whitespace_normalize: bool,
}

/// Per-test-case result published on the egress subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub submission_id: String,
    pub test_case_id: String,
    pub status: Verdict,
    pub time_used_in_ms: u64,
    pub memory_used_in_kb: u64,
    /// Stdout of the user program.
    pub output: String,
    /// Stderr of the user program, compile output, or a host-side error.
    pub error: String,
}
