//! C1: the queue store. Two backends share one contract.
//!
//! The filesystem backend (`fs`) uses atomic cross-directory rename as the
//! sole mutation primitive, following `FileTaskRepository` in the teacher's
//! `task/repository.rs`: reject invalid transitions before touching the
//! filesystem, then let the rename itself be the lock.
//!
//! The server-fields backend (`fields`) keeps state on a remote project item
//! and only writes local lease files; see `crate::leader` for the
//! leader-only-writes discipline that backend depends on.

pub mod fields;
pub mod fs;

use anyhow::Result;

use crate::domain::{Task, TaskState, Wave};

/// The result of a `transition` call that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Moved,
    AlreadyInState,
}

pub trait QueueStore: Send + Sync {
    /// Lists issue numbers currently in `state`, restricted to `wave` if
    /// given, sorted lexicographically by their on-disk/remote key — this
    /// is what makes claim order deterministic and testable.
    fn list(&self, state: TaskState, wave: Option<Wave>) -> Result<Vec<u64>>;

    fn get(&self, issue: u64) -> Result<Option<Task>>;

    /// Moves `issue` from `from` to `to`. Fails if `from -> to` is not an
    /// edge of the state machine; does not mutate anything in that case.
    fn transition(&self, issue: u64, from: TaskState, to: TaskState) -> Result<TransitionOutcome>;

    fn set_attempt(&self, issue: u64, attempt: u32) -> Result<()>;
    fn set_worker(&self, issue: u64, worker: Option<&str>) -> Result<()>;

    /// Replaces the task's prompt body wholesale. Used by the watcher's
    /// remediation step to install the next attempt's prompt (beginning
    /// with `Attempt N: Tried X, now trying Y because Z`) before reopening
    /// a failed task.
    fn set_prompt(&self, issue: u64, prompt: &str) -> Result<()>;

    /// Appends a footer paragraph to the task's prompt body in its current
    /// location. Used for `FAILURE`, `DEAD LETTER`, and `CLAIM CORRUPTION`
    /// footers. Best-effort: failures here must never prevent the state
    /// transition that triggered them.
    fn append_footer(&self, issue: u64, footer: &str) -> Result<()>;

    /// Issues currently claimed by `worker`, restricted to `wave` if given.
    /// Used by the worker to inspect its own slot without seeing other
    /// workers' in-flight claims.
    fn list_claimed_by(&self, worker: &str, wave: Option<Wave>) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        for issue in self.list(TaskState::Claimed, wave)? {
            if let Some(task) = self.get(issue)? {
                if task.worker.as_deref() == Some(worker) {
                    out.push(issue);
                }
            }
        }
        out.sort_by_key(|n| n.to_string());
        Ok(out)
    }
}
