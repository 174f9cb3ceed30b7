//! Capability interfaces injected into the watcher, worker, and coordinator.
//!
//! Concrete implementations (subprocess LLM invocation, `gh` CLI wrapping,
//! real wall-clock sleeping) live at the binary edges; tests inject fakes.

use std::time::Duration;

use anyhow::Result;

/// The result of one LLM invocation.
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl LlmOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Invokes the external LLM CLI. The worker and watcher are the only
/// consumers; neither cares how the runner is implemented.
pub trait LlmRunner: Send + Sync {
    /// Runs `prompt` to completion or until `timeout` elapses, whichever
    /// comes first. A timeout is reported as a non-zero exit code, matching
    /// the teacher's convention of treating a killed child the same as one
    /// that exited with failure.
    fn run(&self, prompt: &str, timeout: Duration) -> Result<LlmOutcome>;
}

/// The minimal GitHub surface the server-fields backend needs.
pub trait GitHubApi: Send + Sync {
    fn set_state_field(&self, issue: u64, state: &str) -> Result<()>;
    fn set_worker_field(&self, issue: u64, worker: Option<&str>) -> Result<()>;
    fn set_attempt_field(&self, issue: u64, attempt: u32) -> Result<()>;
    fn fetch_blocked_by(&self, issue: u64) -> Result<Vec<u64>>;
}

/// Wall-clock access, injected so tests can control "now" deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// Sleeping, injected so watcher/worker loop tests never actually block.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, d: Duration);
}

pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}
