//! C5: the watcher.
//!
//! Owns the transition graph beyond claim/execute: promoting unblocked
//! dependents, routing failures through the attempt ledger, and the
//! startup sweep that recovers from a crash. Following the teacher's
//! `worker/decision.rs` style, the "what to do" decisions are pure
//! functions; `Watcher::tick` is the thin imperative driver.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use crate::depgraph::DependencyIndex;
use crate::domain::{TaskState, Wave};
use crate::ledger::AttemptLedger;
use crate::ports::LlmRunner;
use crate::progress::{EventLog, WaveCounts};
use crate::queue::QueueStore;

/// Durable, idempotent closed-marker set under `admin/closed/`.
pub struct ClosedMarkers {
    dir: PathBuf,
}

impl ClosedMarkers {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join("admin").join("closed");
        fs::create_dir_all(&dir)?;
        Ok(ClosedMarkers { dir })
    }

    fn path(&self, issue: u64) -> PathBuf {
        self.dir.join(format!("{issue}.closed"))
    }

    pub fn is_marked(&self, issue: u64) -> bool {
        self.path(issue).exists()
    }

    /// Marks `issue` closed. Returns `true` if this call newly created the
    /// marker, `false` if it already existed — monotonic, never cleared by
    /// normal operation.
    pub fn mark(&self, issue: u64) -> Result<bool> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path(issue))
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self) -> HashSet<u64> {
        let mut out = HashSet::new();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(n) = name.strip_suffix(".closed") {
                    if let Ok(issue) = n.parse() {
                        out.insert(issue);
                    }
                }
            }
        }
        out
    }
}

/// What the attempt ledger says should happen to a just-failed task.
#[derive(Debug, PartialEq, Eq)]
pub enum FailureRouting {
    Reopen { next_attempt: u32 },
    DeadLetter { final_attempt: u32 },
}

/// Pure decision: given the attempt count *after* incrementing, decide the
/// routing. No I/O.
pub fn decide_failure_routing(attempt_after_increment: u32) -> FailureRouting {
    if AttemptLedger::is_dead_letter(attempt_after_increment) {
        FailureRouting::DeadLetter {
            final_attempt: attempt_after_increment,
        }
    } else {
        FailureRouting::Reopen {
            next_attempt: attempt_after_increment,
        }
    }
}

/// Pure decision: should `dependent` be promoted from blocked to open, given
/// its current state and whether its blockers are all satisfied?
pub fn decide_unlock(dependent_state: TaskState, blockers_satisfied: bool) -> bool {
    dependent_state == TaskState::Blocked && blockers_satisfied
}

pub struct Watcher {
    wave: Wave,
    queue: Arc<dyn QueueStore>,
    depgraph: Arc<Mutex<DependencyIndex>>,
    ledger: Arc<AttemptLedger>,
    markers: ClosedMarkers,
    llm: Arc<dyn LlmRunner>,
    events: Arc<EventLog>,
}

const REMEDIATION_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

impl Watcher {
    /// `depgraph` is an `Arc` so multiple per-wave watchers can share one
    /// dependency index built once at startup from the edges file and raw
    /// issue records.
    pub fn new(
        wave: Wave,
        queue: Arc<dyn QueueStore>,
        depgraph: Arc<Mutex<DependencyIndex>>,
        ledger: Arc<AttemptLedger>,
        markers: ClosedMarkers,
        llm: Arc<dyn LlmRunner>,
        events: Arc<EventLog>,
    ) -> Self {
        Watcher {
            wave,
            queue,
            depgraph,
            ledger,
            markers,
            llm,
            events,
        }
    }


    /// Runs the startup sweep: treats every already-closed issue as if it
    /// had just closed, so dependents blocked by issues closed in an
    /// earlier crash (or an earlier wave) get unlocked without operator
    /// action. Unions the queue's own `closed` listing with pre-existing
    /// closed-markers, since a blocker may have closed in a wave whose
    /// `closed/` directory this process never lists directly.
    pub fn startup_sweep(&self) -> Result<()> {
        let mut issues: HashSet<u64> = self.queue.list(TaskState::Closed, None)?.into_iter().collect();
        issues.extend(self.markers.all());
        for issue in issues {
            self.handle_closed(issue)?;
        }
        Ok(())
    }

    /// Runs one tick: detect newly closed tasks and unlock their
    /// dependents, then detect newly failed tasks and route them through
    /// the attempt ledger.
    pub fn tick(&self) -> Result<()> {
        for issue in self.queue.list(TaskState::Closed, None)? {
            if !self.markers.is_marked(issue) {
                self.handle_closed(issue)?;
            }
        }
        for issue in self.queue.list(TaskState::Failure, Some(self.wave))? {
            self.handle_failure(issue)?;
        }
        Ok(())
    }

    /// Unlocks every dependent of `issue` that is now satisfied. Always runs
    /// the full sweep, even if `issue` was already marked closed by an
    /// earlier call — a crash between marking and unlocking must not leave
    /// dependents stuck forever, so this is idempotent rather than
    /// fresh-only. `markers.mark`'s return value only gates the "newly
    /// closed" trace, not the unlock work itself.
    fn handle_closed(&self, issue: u64) -> Result<()> {
        let newly_closed = self.markers.mark(issue)?;
        if newly_closed {
            tracing::debug!(issue, wave = self.wave, "issue newly marked closed");
        }
        let closed = self.markers.all();
        let dependents = self.depgraph.lock().unwrap().dependents_of(issue);
        for dependent in dependents {
            let Some(task) = self.queue.get(dependent)? else {
                continue;
            };
            let satisfied = self
                .depgraph
                .lock()
                .unwrap()
                .is_satisfied(dependent, &closed);
            if decide_unlock(task.state, satisfied) {
                self.queue
                    .transition(dependent, TaskState::Blocked, TaskState::Open)?;
                self.events.unlock_open(dependent);
            }
        }
        Ok(())
    }

    fn handle_failure(&self, issue: u64) -> Result<()> {
        let attempt = self.ledger.increment(issue)?;
        self.queue.set_attempt(issue, attempt)?;
        match decide_failure_routing(attempt) {
            FailureRouting::DeadLetter { final_attempt } => {
                self.queue
                    .append_footer(issue, &format!("DEAD LETTER after {final_attempt} attempts."))?;
                self.queue
                    .transition(issue, TaskState::Failure, TaskState::Dead)?;
                self.events.dead(issue, final_attempt);
            }
            FailureRouting::Reopen { next_attempt } => {
                let remediation_prompt = self.compose_remediation(issue, next_attempt);
                self.ledger
                    .append_reason(issue, next_attempt, &remediation_prompt)?;
                // Best-effort: a failed remediation query still reopens the
                // task, just with the existing body instead of a refined one.
                if let Some(task) = self.queue.get(issue)? {
                    let new_body = format!(
                        "Attempt {next_attempt}: {remediation_prompt}\n\n{}",
                        task.prompt
                    );
                    let _ = self.queue.set_prompt(issue, &new_body);
                }
                self.queue
                    .transition(issue, TaskState::Failure, TaskState::Open)?;
                self.events.retry(issue, next_attempt);
            }
        }
        Ok(())
    }

    fn compose_remediation(&self, issue: u64, attempt: u32) -> String {
        let query = format!(
            "Issue #{issue} failed on attempt {}. Summarize what was tried and \
             what to try differently next, in one sentence starting with \
             \"Tried X, now trying Y because Z\".",
            attempt.saturating_sub(1)
        );
        match self.llm.run(&query, REMEDIATION_QUERY_TIMEOUT) {
            Ok(outcome) if outcome.succeeded() && !outcome.stdout.trim().is_empty() => {
                outcome.stdout.trim().to_string()
            }
            _ => "Tried the previous approach, now retrying with the original prompt.".to_string(),
        }
    }

    /// Renders the periodic human-readable report for this wave.
    pub fn report(&self) -> Result<WaveCounts> {
        Ok(WaveCounts {
            blocked: self.queue.list(TaskState::Blocked, Some(self.wave))?.len() as u64,
            open: self.queue.list(TaskState::Open, Some(self.wave))?.len() as u64,
            claimed: self.queue.list(TaskState::Claimed, Some(self.wave))?.len() as u64,
            closed: self.queue.list(TaskState::Closed, Some(self.wave))?.len() as u64,
            failure: self.queue.list(TaskState::Failure, Some(self.wave))?.len() as u64,
            dead: self.queue.list(TaskState::Dead, Some(self.wave))?.len() as u64,
        })
    }

    pub fn dead_count(&self) -> Result<usize> {
        Ok(self.queue.list(TaskState::Dead, Some(self.wave))?.len())
    }
}
