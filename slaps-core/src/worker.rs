//! C4: the worker.
//!
//! A worker is single-slotted: at most one task in flight. The decision of
//! *what to do next* is a pure function ([`plan_worker_action`]); the
//! imperative driver ([`Worker::run_once`]) performs the I/O the plan calls
//! for. This split follows the teacher's `worker/cycle.rs::plan_cycle`
//! pattern.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::domain::{TaskState, Wave};
use crate::estimator::Estimator;
use crate::ports::LlmRunner;
use crate::progress::EventLog;
use crate::queue::QueueStore;

/// The instructional prefix prepended to every task prompt, forbidding the
/// LLM from performing version-control operations the orchestrator itself
/// is responsible for. Mirrors the teacher's `executor::build_prompt` hard
/// guardrail.
pub const GUARDRAIL_PREFIX: &str = "\
You are operating inside an orchestrated task queue. Do not create \
branches, commit, or push — the orchestrator manages version control \
around your work. Focus only on the task below.\n\n";

/// What the worker should do this tick, decided with no I/O.
#[derive(Debug, PartialEq, Eq)]
pub enum WorkerAction {
    /// More than one file sits in this worker's claimed slot. Keep the
    /// lexicographically first; route the rest away as corrupted.
    Quarantine { keep: u64, route_away: Vec<u64> },
    /// Exactly one claimed file is present; execute it.
    Execute(u64),
    /// Nothing claimed; try to claim candidates from `open`, in order,
    /// stopping at the first successful atomic move.
    TryClaim(Vec<u64>),
    /// Nothing to do this tick.
    Idle,
}

/// Pure decision function: given what is currently claimed by this worker
/// and what is open, decide the next action. No I/O.
pub fn plan_worker_action(claimed: &[u64], open: &[u64]) -> WorkerAction {
    if claimed.len() > 1 {
        let mut sorted = claimed.to_vec();
        sorted.sort_by_key(|n| n.to_string());
        let keep = sorted[0];
        let route_away = sorted[1..].to_vec();
        return WorkerAction::Quarantine { keep, route_away };
    }
    if let Some(&only) = claimed.first() {
        return WorkerAction::Execute(only);
    }
    if open.is_empty() {
        return WorkerAction::Idle;
    }
    WorkerAction::TryClaim(open.to_vec())
}

pub struct Worker {
    id: String,
    wave: Wave,
    queue: Arc<dyn QueueStore>,
    llm: Arc<dyn LlmRunner>,
    estimator: Arc<Estimator>,
    events: Arc<EventLog>,
}

impl Worker {
    /// The worker never touches the attempt ledger — attempt counting and
    /// retry/dead-letter routing belong entirely to the watcher, per
    /// `spec.md` §4.4.
    pub fn new(
        id: impl Into<String>,
        wave: Wave,
        queue: Arc<dyn QueueStore>,
        llm: Arc<dyn LlmRunner>,
        estimator: Arc<Estimator>,
        events: Arc<EventLog>,
    ) -> Self {
        Worker {
            id: id.into(),
            wave,
            queue,
            llm,
            estimator,
            events,
        }
    }

    /// Runs one unit of work. Returns `true` if work occurred.
    pub fn run_once(&self) -> Result<bool> {
        let claimed = self.queue.list_claimed_by(&self.id, Some(self.wave))?;
        let open = self.queue.list(TaskState::Open, Some(self.wave))?;

        match plan_worker_action(&claimed, &open) {
            WorkerAction::Quarantine { keep, route_away } => {
                for issue in route_away {
                    self.queue.append_footer(
                        issue,
                        "CLAIM CORRUPTION: more than one file found in this worker's claimed slot.",
                    )?;
                    self.queue
                        .transition(issue, TaskState::Claimed, TaskState::Failure)?;
                    self.events.claim_corruption(issue, &self.id);
                }
                self.execute(keep)?;
                Ok(true)
            }
            WorkerAction::Execute(issue) => {
                self.execute(issue)?;
                Ok(true)
            }
            WorkerAction::TryClaim(candidates) => {
                for issue in candidates {
                    self.queue.set_worker(issue, Some(&self.id))?;
                    match self
                        .queue
                        .transition(issue, TaskState::Open, TaskState::Claimed)
                    {
                        Ok(_) => {
                            self.events.claimed(issue, &self.id);
                            self.execute(issue)?;
                            return Ok(true);
                        }
                        Err(_) => continue, // another worker won the race
                    }
                }
                Ok(false)
            }
            WorkerAction::Idle => Ok(false),
        }
    }

    fn execute(&self, issue: u64) -> Result<()> {
        let task = self
            .queue
            .get(issue)?
            .ok_or_else(|| anyhow::anyhow!("claimed issue {issue} vanished from the queue"))?;

        let timeout_sec = self.estimator.timeout_for(issue, task.attempt)?;
        let prompt = format!("{GUARDRAIL_PREFIX}{}", task.prompt);
        let outcome = self.llm.run(&prompt, Duration::from_secs(timeout_sec))?;

        if outcome.succeeded() {
            tracing::info!(issue, worker = %self.id, "task succeeded");
            self.queue
                .transition(issue, TaskState::Claimed, TaskState::Closed)?;
            self.events.success(issue, &self.id);
        } else {
            tracing::warn!(issue, worker = %self.id, exit_code = outcome.exit_code, "task failed");
            let footer = format!(
                "FAILURE (exit {}):\nstdout:\n{}\nstderr:\n{}",
                outcome.exit_code, outcome.stdout, outcome.stderr
            );
            self.queue.append_footer(issue, &footer)?;
            self.queue
                .transition(issue, TaskState::Claimed, TaskState::Failure)?;
            self.events
                .failure_reopen(issue, &self.id, outcome.exit_code);
        }
        Ok(())
    }
}
