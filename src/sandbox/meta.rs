//! Isolate meta-file parser
//!
//! The isolate tool writes a line-oriented `key:value` report after each
//! run. This parser extracts the fields the executor classifies on; unknown
//! keys are ignored.

/// Raw run status reported by isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaStatus {
    /// No status line; the run completed without incident.
    Ok,
    /// `TO` — time limit exceeded.
    TimeOut,
    /// `SG` — killed by a signal.
    Signaled,
    /// `RE` — non-zero exit.
    RuntimeError,
    /// `XX` — internal error inside isolate itself.
    InternalError,
    /// Any other status value.
    Other,
}

/// Parsed contents of the meta report.
#[derive(Debug, Clone)]
pub struct IsolateMeta {
    /// CPU time in milliseconds.
    pub time_ms: u64,
    /// Wall-clock time in milliseconds.
    pub wall_time_ms: u64,
    /// Peak RSS in KB; superseded by `cg_mem_kb` under cgroups.
    pub max_rss_kb: u64,
    /// Peak cgroup memory in KB (reported in bytes, rounded up).
    pub cg_mem_kb: u64,
    /// Whether the cgroup OOM killer fired.
    pub oom_killed: bool,
    pub exit_code: i32,
    pub status: MetaStatus,
    /// Human-readable note isolate attaches to abnormal runs.
    pub message: String,
}

impl Default for IsolateMeta {
    fn default() -> Self {
        Self {
            time_ms: 0,
            wall_time_ms: 0,
            max_rss_kb: 0,
            cg_mem_kb: 0,
            oom_killed: false,
            exit_code: 0,
            status: MetaStatus::Ok,
            message: String::new(),
        }
    }
}

/// Parse a meta report. Malformed lines are skipped.
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "time" => {
                if let Ok(t) = value.parse::<f64>() {
                    meta.time_ms = (t * 1000.0).round() as u64;
                }
            }
            "time-wall" => {
                if let Ok(t) = value.parse::<f64>() {
                    meta.wall_time_ms = (t * 1000.0).round() as u64;
                }
            }
            "max-rss" => {
                if let Ok(kb) = value.parse::<u64>() {
                    meta.max_rss_kb = kb;
                }
            }
            "cg-mem" => {
                if let Ok(bytes) = value.parse::<u64>() {
                    meta.cg_mem_kb = bytes.div_ceil(1024);
                }
            }
            "cg-oom-killed" => {
                meta.oom_killed = value.parse::<u64>().map(|v| v > 0).unwrap_or(false);
            }
            "exitcode" => {
                meta.exit_code = value.parse().unwrap_or(0);
            }
            "status" => {
                meta.status = match value {
                    "TO" => MetaStatus::TimeOut,
                    "SG" => MetaStatus::Signaled,
                    "RE" => MetaStatus::RuntimeError,
                    "XX" => MetaStatus::InternalError,
                    "" => MetaStatus::Ok,
                    _ => MetaStatus::Other,
                };
            }
            "message" => {
                meta.message = value.to_string();
            }
            _ => {}
        }
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_run() {
        let content = "time:0.015\ntime-wall:0.020\ncg-mem:1048576\nexitcode:0\n";
        let meta = parse_meta(content);

        assert_eq!(meta.time_ms, 15);
        assert_eq!(meta.wall_time_ms, 20);
        assert_eq!(meta.cg_mem_kb, 1024);
        assert_eq!(meta.exit_code, 0);
        assert_eq!(meta.status, MetaStatus::Ok);
        assert!(!meta.oom_killed);
    }

    #[test]
    fn test_parse_timeout() {
        let meta = parse_meta("time:1.000\nstatus:TO\nmessage:Time limit exceeded\n");

        assert_eq!(meta.time_ms, 1000);
        assert_eq!(meta.status, MetaStatus::TimeOut);
        assert_eq!(meta.message, "Time limit exceeded");
    }

    #[test]
    fn test_parse_oom_kill() {
        let meta = parse_meta("status:SG\nexitsig:9\ncg-mem:67108864\ncg-oom-killed:1\n");

        assert_eq!(meta.status, MetaStatus::Signaled);
        assert_eq!(meta.cg_mem_kb, 65536);
        assert!(meta.oom_killed);
    }

    #[test]
    fn test_cg_mem_rounds_up_to_kb() {
        let meta = parse_meta("cg-mem:1025\n");
        assert_eq!(meta.cg_mem_kb, 2);
    }

    #[test]
    fn test_unknown_keys_and_malformed_lines_ignored() {
        let meta = parse_meta("csw-voluntary:3\nnot a pair\nexitcode:7\n");
        assert_eq!(meta.exit_code, 7);
        assert_eq!(meta.status, MetaStatus::Ok);
    }
}
