//! End-to-end scenarios for the direct executor, using plain host tools.
//!
//! These run real subprocesses and assume a Unix host with `/bin/sh`,
//! `/bin/cat`, and `/bin/sleep`.

use std::path::PathBuf;

use runner_service::models::Verdict;
use runner_service::sandbox::{DirectExecutor, Executor, RunRequest, SandboxError};

fn request(command: &[&str], input: &str, time_limit_ms: u64, memory_limit_kb: u64) -> RunRequest {
    RunRequest {
        submission_id: "sub-direct".into(),
        test_case_id: "tc-1".into(),
        run_command: command.iter().map(|s| s.to_string()).collect(),
        working_dir: std::env::temp_dir(),
        input: input.into(),
        time_limit_ms,
        memory_limit_kb,
    }
}

#[tokio::test]
async fn test_success_echoes_stdin() {
    let executor = DirectExecutor::new();
    let result = executor
        .execute(request(&["/bin/cat"], "hi\n", 2_000, 65_536))
        .await
        .unwrap();

    assert_eq!(result.status, Verdict::Success);
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.exit_code, 0);
    assert!(result.time_used_ms < 2_000);
}

#[tokio::test]
async fn test_runtime_error_preserves_exit_code() {
    let executor = DirectExecutor::new();
    let result = executor
        .execute(request(&["/bin/sh", "-c", "echo oops >&2; exit 7"], "", 2_000, 65_536))
        .await
        .unwrap();

    assert_eq!(result.status, Verdict::RuntimeError);
    assert_eq!(result.exit_code, 7);
    assert!(result.stderr.contains("oops"));
}

#[tokio::test]
async fn test_time_limit_exceeded_kills_process() {
    let executor = DirectExecutor::new();
    let result = executor
        .execute(request(&["/bin/sleep", "10"], "", 200, 65_536))
        .await
        .unwrap();

    assert_eq!(result.status, Verdict::TimeLimitExceeded);
    assert!(result.time_used_ms >= 200);
}

#[tokio::test]
async fn test_memory_limit_exceeded_kills_process() {
    let executor = DirectExecutor::new();
    // Builds a ~50 MiB string inside the shell, then idles; the watcher
    // must flag the overrun and kill the process long before the deadline.
    let allocate = r#"s=$(head -c 50000000 /dev/zero | tr '\0' 'x'); sleep 10"#;
    let result = executor
        .execute(request(&["/bin/sh", "-c", allocate], "", 30_000, 8_192))
        .await
        .unwrap();

    assert_eq!(result.status, Verdict::MemoryLimitExceeded);
    assert!(result.memory_used_kb >= 8_192);
    // The sleep was cut short, so the memory verdict beat the time limit.
    assert!(result.time_used_ms < 30_000);
}

#[tokio::test]
async fn test_launch_failure_is_command_start_error() {
    let executor = DirectExecutor::new();
    let err = executor
        .execute(request(&["/nonexistent/interpreter"], "", 1_000, 65_536))
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::CommandStart(_)));
}

#[tokio::test]
async fn test_runs_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("data.txt"), "payload\n")
        .await
        .unwrap();

    let executor = DirectExecutor::new();
    let mut req = request(&["/bin/cat", "data.txt"], "", 2_000, 65_536);
    req.working_dir = PathBuf::from(dir.path());
    let result = executor.execute(req).await.unwrap();

    assert_eq!(result.status, Verdict::Success);
    assert_eq!(result.stdout, "payload\n");
}
