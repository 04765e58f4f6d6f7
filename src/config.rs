//! Service configuration
//!
//! Loaded from a `config.yaml` searched across well-known directories, with
//! every recognized key overridable through `RUNNER_`-prefixed environment
//! variables (dots in the key path become underscores). A missing file is
//! fine; defaults and environment variables still apply.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::sandbox::SandboxType;

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Top-level configuration for the runner service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub nats: NatsConfig,
    pub runner: RunnerConfig,
}

/// Bus connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NatsConfig {
    pub url: String,
    pub submission_created_subject: String,
    pub submission_result_subject: String,
    pub queue_group: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
            submission_created_subject: "submission.created".into(),
            submission_result_subject: "submission.result".into(),
            queue_group: "runner-service-group".into(),
        }
    }
}

/// Settings for the submission pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Root directory for per-submission workspaces.
    pub sandbox_base_dir: PathBuf,
    /// Deadline for the host-side compile step, in seconds.
    pub compilation_timeout_sec: u64,
    pub sandbox_type: SandboxType,
    /// Maximum in-flight submissions; zero or negative means unbounded.
    pub max_concurrent_jobs: i64,
    /// Deadline for one whole submission, in seconds.
    pub submission_timeout_sec: u64,
    pub isolate: IsolateConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sandbox_base_dir: PathBuf::from("/tmp/runner_sandbox"),
            compilation_timeout_sec: 30,
            sandbox_type: SandboxType::Direct,
            max_concurrent_jobs: 100,
            submission_timeout_sec: 300,
            isolate: IsolateConfig::default(),
        }
    }
}

/// Settings specific to the isolate backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IsolateConfig {
    /// Path to the isolate executable.
    pub isolate_path: String,
    /// PATH exposed to sandboxed processes.
    pub env_path: String,
    /// File size cap in KB.
    pub fsize_kb: u64,
    /// Process count cap.
    pub processes: u32,
    /// Grace period before a hard kill, in seconds.
    pub extra_time_seconds: f64,
    /// Wall-time cap as a multiple of the CPU-time cap.
    pub wall_time_factor: f64,
    /// Host directory for per-box stdin/stdout/stderr/meta files; defaults
    /// to the OS temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            isolate_path: "isolate".into(),
            env_path: "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".into(),
            fsize_kb: 65536,
            processes: 64,
            extra_time_seconds: 2.0,
            wall_time_factor: 2.0,
            temp_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the first `config.yaml` found in
    /// `extra_paths`, `./configs`, `.`, or `/etc/runner-service/`, then
    /// apply environment overrides.
    pub fn load(extra_paths: &[PathBuf]) -> Result<Self> {
        let mut candidates: Vec<PathBuf> = extra_paths.to_vec();
        candidates.push(PathBuf::from("./configs"));
        candidates.push(PathBuf::from("."));
        candidates.push(PathBuf::from("/etc/runner-service/"));

        let mut config = match candidates
            .iter()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|path| path.is_file())
        {
            Some(path) => {
                info!(path = %path.display(), "using config file");
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => {
                info!("config file not found; using defaults and environment variables");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `RUNNER_`-prefixed environment overrides for every recognized
    /// key. `nats.url` maps to `RUNNER_NATS_URL`,
    /// `runner.sandboxBaseDir` to `RUNNER_RUNNER_SANDBOXBASEDIR`, and so on.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(url) = env_var("nats.url") {
            self.nats.url = url;
        }
        if let Some(subject) = env_var("nats.submissionCreatedSubject") {
            self.nats.submission_created_subject = subject;
        }
        if let Some(subject) = env_var("nats.submissionResultSubject") {
            self.nats.submission_result_subject = subject;
        }
        if let Some(group) = env_var("nats.queueGroup") {
            self.nats.queue_group = group;
        }
        if let Some(dir) = env_var("runner.sandboxBaseDir") {
            self.runner.sandbox_base_dir = PathBuf::from(dir);
        }
        if let Some(value) = env_var("runner.compilationTimeoutSec") {
            self.runner.compilation_timeout_sec = parse_env("runner.compilationTimeoutSec", &value)?;
        }
        if let Some(value) = env_var("runner.sandboxType") {
            self.runner.sandbox_type = match value.to_lowercase().as_str() {
                "direct" => SandboxType::Direct,
                "isolate" => SandboxType::Isolate,
                "firejail" => SandboxType::Firejail,
                other => anyhow::bail!("unknown sandbox type from environment: {other}"),
            };
        }
        if let Some(value) = env_var("runner.maxConcurrentJobs") {
            self.runner.max_concurrent_jobs = parse_env("runner.maxConcurrentJobs", &value)?;
        }
        if let Some(value) = env_var("runner.submissionTimeoutSec") {
            self.runner.submission_timeout_sec = parse_env("runner.submissionTimeoutSec", &value)?;
        }
        if let Some(path) = env_var("runner.isolate.isolatePath") {
            self.runner.isolate.isolate_path = path;
        }
        if let Some(path) = env_var("runner.isolate.envPath") {
            self.runner.isolate.env_path = path;
        }
        if let Some(value) = env_var("runner.isolate.fsizeKb") {
            self.runner.isolate.fsize_kb = parse_env("runner.isolate.fsizeKb", &value)?;
        }
        if let Some(value) = env_var("runner.isolate.processes") {
            self.runner.isolate.processes = parse_env("runner.isolate.processes", &value)?;
        }
        if let Some(value) = env_var("runner.isolate.extraTimeSeconds") {
            self.runner.isolate.extra_time_seconds =
                parse_env("runner.isolate.extraTimeSeconds", &value)?;
        }
        if let Some(value) = env_var("runner.isolate.wallTimeFactor") {
            self.runner.isolate.wall_time_factor =
                parse_env("runner.isolate.wallTimeFactor", &value)?;
        }
        if let Some(dir) = env_var("runner.isolate.tempDir") {
            self.runner.isolate.temp_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }
}

impl IsolateConfig {
    /// Host directory used for per-box temp files.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(env::temp_dir)
    }
}

fn env_var(key: &str) -> Option<String> {
    let name = format!("RUNNER_{}", key.replace('.', "_").to_uppercase());
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value {value:?} for {key}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.nats.url, "nats://localhost:4222");
        assert_eq!(cfg.nats.submission_created_subject, "submission.created");
        assert_eq!(cfg.nats.submission_result_subject, "submission.result");
        assert_eq!(cfg.nats.queue_group, "runner-service-group");
        assert_eq!(cfg.runner.sandbox_base_dir, PathBuf::from("/tmp/runner_sandbox"));
        assert_eq!(cfg.runner.compilation_timeout_sec, 30);
        assert_eq!(cfg.runner.sandbox_type, SandboxType::Direct);
        assert_eq!(cfg.runner.max_concurrent_jobs, 100);
        assert_eq!(cfg.runner.submission_timeout_sec, 300);
        assert_eq!(cfg.runner.isolate.fsize_kb, 65536);
        assert_eq!(cfg.runner.isolate.processes, 64);
    }

    #[test]
    fn test_yaml_keys_are_camel_case() {
        let yaml = r#"
nats:
  url: nats://bus:4222
  queueGroup: judges
runner:
  sandboxType: isolate
  maxConcurrentJobs: 4
  isolate:
    isolatePath: /usr/local/bin/isolate
    wallTimeFactor: 3.0
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.nats.url, "nats://bus:4222");
        assert_eq!(cfg.nats.queue_group, "judges");
        // Unset keys keep their defaults.
        assert_eq!(cfg.nats.submission_created_subject, "submission.created");
        assert_eq!(cfg.runner.sandbox_type, SandboxType::Isolate);
        assert_eq!(cfg.runner.max_concurrent_jobs, 4);
        assert_eq!(cfg.runner.isolate.isolate_path, "/usr/local/bin/isolate");
        assert_eq!(cfg.runner.isolate.wall_time_factor, 3.0);
    }

    #[test]
    fn test_env_override_wins_over_defaults() {
        std::env::set_var("RUNNER_NATS_URL", "nats://override:4222");
        std::env::set_var("RUNNER_RUNNER_MAXCONCURRENTJOBS", "7");

        let mut cfg = Config::default();
        cfg.apply_env_overrides().unwrap();

        assert_eq!(cfg.nats.url, "nats://override:4222");
        assert_eq!(cfg.runner.max_concurrent_jobs, 7);

        std::env::remove_var("RUNNER_NATS_URL");
        std::env::remove_var("RUNNER_RUNNER_MAXCONCURRENTJOBS");
    }
}
