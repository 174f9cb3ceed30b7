//! Server-fields [`super::QueueStore`] backend.
//!
//! State lives on a remote project item; this store keeps an in-memory
//! mirror (refreshed by [`crate::cache`]) and applies mutations through
//! [`crate::ports::GitHubApi`]. Claim is a two-step protocol: the worker
//! first creates an exclusive local lease file (see [`LeaseDir`]), then the
//! leader reflects the claim into the server field on its next tick (see
//! [`crate::leader`]). Only the leader calls through to `GitHubApi`;
//! non-leader processes still create/release local leases.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::{QueueStore, TransitionOutcome};
use crate::domain::{Task, TaskState, Wave};
use crate::errors::SlapsError;
use crate::ports::GitHubApi;

/// Local exclusive lease files, one per in-flight claim attempt.
pub struct LeaseDir {
    dir: PathBuf,
}

impl LeaseDir {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(LeaseDir { dir })
    }

    fn path(&self, issue: u64) -> PathBuf {
        self.dir.join(format!("{issue}.lock.txt"))
    }

    /// Atomically creates a lease for `issue`. Returns `false` if a lease
    /// already exists (another worker is attempting the same claim).
    pub fn acquire(&self, issue: u64, worker_id: &str) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path(issue))
        {
            Ok(mut f) => {
                use std::io::Write;
                write!(f, "{worker_id}")?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn release(&self, issue: u64) -> Result<()> {
        let path = self.path(issue);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_held(&self, issue: u64) -> bool {
        self.path(issue).exists()
    }

    /// Reaps leases older than `ttl_sec`. Returns the reaped issue numbers.
    pub fn reap_stale(&self, ttl_sec: u64) -> Result<Vec<u64>> {
        let mut reaped = Vec::new();
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Ok(reaped);
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let age = modified.elapsed().unwrap_or_default();
            if age.as_secs() >= ttl_sec {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(issue_str) = name.strip_suffix(".lock.txt") {
                    if let Ok(issue) = issue_str.parse::<u64>() {
                        let _ = fs::remove_file(entry.path());
                        reaped.push(issue);
                    }
                }
            }
        }
        Ok(reaped)
    }
}

pub struct FieldsQueueStore {
    api: Arc<dyn GitHubApi>,
    leases: LeaseDir,
    mirror: Mutex<HashMap<u64, Task>>,
}

impl FieldsQueueStore {
    pub fn new(api: Arc<dyn GitHubApi>, lease_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(FieldsQueueStore {
            api,
            leases: LeaseDir::new(lease_dir)?,
            mirror: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the in-memory mirror, e.g. from a fresh [`crate::cache`]
    /// snapshot. The leader is the only process expected to call this with
    /// authoritative data; other processes may call it with cached reads.
    pub fn sync_from(&self, tasks: Vec<Task>) {
        let mut mirror = self.mirror.lock().unwrap();
        mirror.clear();
        for t in tasks {
            mirror.insert(t.issue, t);
        }
    }

    pub fn leases(&self) -> &LeaseDir {
        &self.leases
    }
}

impl QueueStore for FieldsQueueStore {
    fn list(&self, state: TaskState, wave: Option<Wave>) -> Result<Vec<u64>> {
        let mirror = self.mirror.lock().unwrap();
        let mut out: Vec<u64> = mirror
            .values()
            .filter(|t| t.state == state && wave.map(|w| w == t.wave).unwrap_or(true))
            .map(|t| t.issue)
            .collect();
        out.sort_by_key(|n| n.to_string());
        Ok(out)
    }

    fn get(&self, issue: u64) -> Result<Option<Task>> {
        Ok(self.mirror.lock().unwrap().get(&issue).cloned())
    }

    fn transition(&self, issue: u64, from: TaskState, to: TaskState) -> Result<TransitionOutcome> {
        if !from.can_transition_to(to) {
            return Err(SlapsError::InvalidTransition {
                issue,
                from: from.as_str(),
                to: to.as_str(),
            }
            .into());
        }
        let current = {
            let mirror = self.mirror.lock().unwrap();
            mirror
                .get(&issue)
                .ok_or_else(|| anyhow!("issue {issue} not found in fields mirror"))?
                .state
        };
        if current != from {
            if current == to {
                return Ok(TransitionOutcome::AlreadyInState);
            }
            return Err(SlapsError::InvalidTransition {
                issue,
                from: current.as_str(),
                to: to.as_str(),
            }
            .into());
        }
        self.api.set_state_field(issue, to.as_str())?;
        let mut mirror = self.mirror.lock().unwrap();
        if let Some(t) = mirror.get_mut(&issue) {
            t.state = to;
        }
        if to != TaskState::Claimed {
            // Claim reflection releases the lease once the server agrees.
            drop(mirror);
            let _ = self.leases.release(issue);
        }
        Ok(TransitionOutcome::Moved)
    }

    fn set_attempt(&self, issue: u64, attempt: u32) -> Result<()> {
        self.api.set_attempt_field(issue, attempt)?;
        if let Some(t) = self.mirror.lock().unwrap().get_mut(&issue) {
            t.attempt = attempt;
        }
        Ok(())
    }

    fn set_worker(&self, issue: u64, worker: Option<&str>) -> Result<()> {
        self.api.set_worker_field(issue, worker)?;
        if let Some(t) = self.mirror.lock().unwrap().get_mut(&issue) {
            t.worker = worker.map(|w| w.to_string());
        }
        Ok(())
    }

    fn append_footer(&self, issue: u64, footer: &str) -> Result<()> {
        if let Some(t) = self.mirror.lock().unwrap().get_mut(&issue) {
            t.prompt.push_str("\n\n");
            t.prompt.push_str(footer);
        }
        Ok(())
    }

    fn set_prompt(&self, issue: u64, prompt: &str) -> Result<()> {
        if let Some(t) = self.mirror.lock().unwrap().get_mut(&issue) {
            t.prompt = prompt.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct FakeApi {
        calls: StdMutex<Vec<String>>,
    }

    impl FakeApi {
        fn new() -> Self {
            FakeApi {
                calls: StdMutex::new(Vec::new()),
            }
        }
    }

    impl GitHubApi for FakeApi {
        fn set_state_field(&self, issue: u64, state: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("state {issue} {state}"));
            Ok(())
        }
        fn set_worker_field(&self, _issue: u64, _worker: Option<&str>) -> Result<()> {
            Ok(())
        }
        fn set_attempt_field(&self, _issue: u64, _attempt: u32) -> Result<()> {
            Ok(())
        }
        fn fetch_blocked_by(&self, _issue: u64) -> Result<Vec<u64>> {
            Ok(vec![])
        }
    }

    #[test]
    fn lease_acquire_is_exclusive() {
        let dir = tempdir().unwrap();
        let leases = LeaseDir::new(dir.path()).unwrap();
        assert!(leases.acquire(1, "w1").unwrap());
        assert!(!leases.acquire(1, "w2").unwrap());
        leases.release(1).unwrap();
        assert!(leases.acquire(1, "w2").unwrap());
    }

    #[test]
    fn transition_calls_api_and_updates_mirror() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        let store = FieldsQueueStore::new(api.clone(), dir.path()).unwrap();
        store.sync_from(vec![Task::new(5, 1, "body")]);
        // Task::new starts Blocked; move to Open.
        let outcome = store
            .transition(5, TaskState::Blocked, TaskState::Open)
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Moved);
        assert_eq!(store.get(5).unwrap().unwrap().state, TaskState::Open);
        assert_eq!(api.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn claim_releases_lease_once_reflected() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        let store = FieldsQueueStore::new(api, dir.path()).unwrap();
        let mut t = Task::new(5, 1, "body");
        t.state = TaskState::Open;
        store.sync_from(vec![t]);
        store.leases().acquire(5, "w1").unwrap();
        assert!(store.leases().is_held(5));
        store
            .transition(5, TaskState::Open, TaskState::Claimed)
            .unwrap();
        assert!(store.leases().is_held(5), "claimed state keeps lease held");
    }

    #[test]
    fn invalid_transition_does_not_call_api() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        let store = FieldsQueueStore::new(api.clone(), dir.path()).unwrap();
        store.sync_from(vec![Task::new(5, 1, "body")]);
        let err = store.transition(5, TaskState::Blocked, TaskState::Closed);
        assert!(err.is_err());
        assert!(api.calls.lock().unwrap().is_empty());
    }
}
