//! C8: the wave coordinator.
//!
//! Sequences waves from `wave_start` to the highest wave present in the
//! queue. Per wave: preflight, run the watcher to quiescence, check for
//! dead-letter overflow, invoke the Quality Guardian, push. Any wave-level
//! failure aborts the whole run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::progress::EventLog;
use crate::watcher::Watcher;

/// External collaborator that runs the test suite after a wave, fixes
/// regressions, and commits. Its exit code is propagated verbatim.
pub trait QualityGuardian: Send + Sync {
    fn run(&self, wave: u32) -> Result<i32>;
}

/// External collaborator that pushes committed changes upstream.
pub trait Pusher: Send + Sync {
    fn push(&self) -> Result<bool>;
}

/// External collaborator that verifies the containerized toolchain is
/// reachable before a wave starts.
pub trait Preflight: Send + Sync {
    fn check(&self) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveOutcome {
    Completed,
    DeadOverflow { dead_count: usize },
    GuardianFailed { exit_code: i32 },
    PushFailed,
    PreflightFailed,
}

pub struct CoordinatorExitCode(pub i32);

pub struct Coordinator {
    pub wave_start: u32,
    pub wave_end: u32,
    pub watchers: Vec<(u32, Watcher)>,
    pub guardian: Arc<dyn QualityGuardian>,
    pub pusher: Arc<dyn Pusher>,
    pub preflight: Arc<dyn Preflight>,
    pub events: Arc<EventLog>,
    pub tick_interval: Duration,
    pub max_ticks_per_wave: u64,
}

impl Coordinator {
    /// Runs every configured wave in order. Returns the process exit code
    /// described in `spec.md` §4.8: 0 on full success, 1 on any wave-level
    /// failure, 2 on configuration errors (surfaced by the caller, not
    /// here — an empty watcher list is itself a configuration error).
    pub fn run(&self) -> Result<i32> {
        if self.watchers.is_empty() {
            return Ok(2);
        }
        for (wave, watcher) in &self.watchers {
            tracing::info!(wave, "starting wave");
            self.events.wave_start(*wave);
            let outcome = self.run_wave(*wave, watcher)?;
            match outcome {
                WaveOutcome::Completed => {
                    tracing::info!(wave, "wave complete");
                    self.events.wave_complete(*wave);
                }
                WaveOutcome::DeadOverflow { dead_count } => {
                    tracing::warn!(wave, dead_count, "wave aborted: dead-letter overflow");
                    self.events
                        .degraded(&format!("wave {wave} has {dead_count} dead task(s)"));
                    return Ok(1);
                }
                WaveOutcome::GuardianFailed { exit_code } => {
                    tracing::warn!(wave, exit_code, "wave aborted: quality guardian failed");
                    self.events
                        .doctor_fail(*wave, &format!("quality guardian exit {exit_code}"));
                    return Ok(1);
                }
                WaveOutcome::PushFailed => {
                    tracing::warn!(wave, "wave aborted: push failed");
                    self.events.degraded("push failed");
                    return Ok(1);
                }
                WaveOutcome::PreflightFailed => {
                    tracing::warn!(wave, "wave aborted: preflight failed");
                    self.events.degraded("preflight failed");
                    return Ok(1);
                }
            }
        }
        self.events.all_complete();
        Ok(0)
    }

    fn run_wave(&self, wave: u32, watcher: &Watcher) -> Result<WaveOutcome> {
        tracing::debug!(wave, "running preflight check");
        if !self.preflight.check()? {
            return Ok(WaveOutcome::PreflightFailed);
        }

        watcher.startup_sweep()?;
        let mut ticks = 0u64;
        loop {
            watcher.tick()?;
            let report = watcher.report()?;
            let dead = watcher.dead_count()?;
            if dead > 0 {
                return Ok(WaveOutcome::DeadOverflow { dead_count: dead });
            }
            let remaining = report.open + report.claimed + report.blocked;
            if remaining == 0 {
                break;
            }
            ticks += 1;
            if self.max_ticks_per_wave > 0 && ticks >= self.max_ticks_per_wave {
                break;
            }
        }

        let dead = watcher.dead_count()?;
        if dead > 0 {
            return Ok(WaveOutcome::DeadOverflow { dead_count: dead });
        }

        let rc = self.guardian.run(wave)?;
        if rc != 0 {
            return Ok(WaveOutcome::GuardianFailed { exit_code: rc });
        }

        if !self.pusher.push()? {
            return Ok(WaveOutcome::PushFailed);
        }

        Ok(WaveOutcome::Completed)
    }
}
