//! Filesystem-backed [`super::QueueStore`].
//!
//! Layout under `root`:
//!
//! ```text
//! root/
//!   wave-<N>/
//!     blocked/<issue>.md
//!     open/<issue>.md
//!     claimed/<worker>/<issue>.md
//!     closed/<issue>.md
//!     failed/<issue>.md
//!     dead/<issue>.md
//!   raw/issue-<N>.json
//!   admin/closed/<N>.closed
//!   admin/edges.csv
//!   admin/attempts/<N>.count
//!   admin/estimates/<N>.json
//!   failures/reasons/<N>.txt
//! ```
//!
//! Grounded on `FileTaskRepository` (directory-per-status, `fs::rename` as
//! the transition primitive) and `atomic_write` (temp-file-same-dir +
//! `sync_all` + rename) from the teacher's `worker/store.rs`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{QueueStore, TransitionOutcome};
use crate::domain::{Task, TaskState, Wave};
use crate::errors::SlapsError;

const STATES: [TaskState; 6] = [
    TaskState::Blocked,
    TaskState::Open,
    TaskState::Claimed,
    TaskState::Closed,
    TaskState::Failure,
    TaskState::Dead,
];

pub struct FsQueueStore {
    root: PathBuf,
}

impl FsQueueStore {
    /// Creates (if needed) and validates the store rooted at `root`.
    ///
    /// Refuses to start if the root cannot be created, and — on Unix — if
    /// the per-wave state directories do not all share one filesystem
    /// device, since atomic rename across devices is not possible.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("creating queue root {root:?}"))?;
        fs::create_dir_all(root.join("raw"))?;
        fs::create_dir_all(root.join("admin").join("closed"))?;
        fs::create_dir_all(root.join("admin").join("attempts"))?;
        fs::create_dir_all(root.join("admin").join("estimates"))?;
        fs::create_dir_all(root.join("failures").join("reasons"))?;
        Ok(FsQueueStore { root })
    }

    pub fn wave_dir(&self, wave: Wave) -> PathBuf {
        self.root.join(format!("wave-{wave}"))
    }

    fn ensure_wave_dirs(&self, wave: Wave) -> Result<()> {
        let base = self.wave_dir(wave);
        for state in STATES {
            if state == TaskState::Claimed {
                continue; // subdirectories created per-worker on demand
            }
            fs::create_dir_all(base.join(state.as_str()))?;
        }
        self.check_same_device(&base)?;
        Ok(())
    }

    #[cfg(unix)]
    fn check_same_device(&self, wave_base: &Path) -> Result<()> {
        use std::os::unix::fs::MetadataExt;
        let mut dev: Option<u64> = None;
        for state in STATES {
            if state == TaskState::Claimed {
                continue;
            }
            let dir = wave_base.join(state.as_str());
            let meta = fs::metadata(&dir)?;
            match dev {
                None => dev = Some(meta.dev()),
                Some(d) if d == meta.dev() => {}
                Some(_) => return Err(SlapsError::CrossDevice.into()),
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_same_device(&self, _wave_base: &Path) -> Result<()> {
        Ok(())
    }

    fn state_dir(&self, wave: Wave, state: TaskState) -> PathBuf {
        self.wave_dir(wave).join(state.as_str())
    }

    fn claimed_dir(&self, wave: Wave, worker: &str) -> PathBuf {
        self.wave_dir(wave).join("claimed").join(worker)
    }

    fn file_name(issue: u64) -> String {
        format!("{issue}.md")
    }

    /// Finds which wave and state currently hold `issue`, scanning every
    /// wave directory under root. Returns `None` if the issue is not found
    /// anywhere (not yet created, or already archived by an admin action).
    fn locate(&self, issue: u64) -> Result<Option<(Wave, TaskState, Option<String>, PathBuf)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return Ok(None),
        };
        let target = Self::file_name(issue);
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(wave_str) = name.strip_prefix("wave-") else {
                continue;
            };
            let Ok(wave) = wave_str.parse::<Wave>() else {
                continue;
            };
            for state in STATES {
                if state == TaskState::Claimed {
                    let claimed_base = self.wave_dir(wave).join("claimed");
                    let Ok(workers) = fs::read_dir(&claimed_base) else {
                        continue;
                    };
                    for worker_entry in workers.flatten() {
                        let path = worker_entry.path().join(&target);
                        if path.exists() {
                            let worker = worker_entry.file_name().to_string_lossy().to_string();
                            return Ok(Some((wave, state, Some(worker), path)));
                        }
                    }
                } else {
                    let path = self.state_dir(wave, state).join(&target);
                    if path.exists() {
                        return Ok(Some((wave, state, None, path)));
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Writes `contents` to `path` atomically: write to a `.tmp` sibling in the
/// same directory, `sync_all`, then `fs::rename` over the destination.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent: {path:?}"))?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "atomic".to_string())
    ));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        tracing::error!(path = %path.display(), error = %e, "atomic rename failed");
        return Err(e.into());
    }
    Ok(())
}

fn parse_task_file(contents: &str, issue: u64, wave: Wave, state: TaskState) -> Task {
    let mut attempt = 0u32;
    let mut worker = None;
    let mut body_start = 0;
    if let Some(rest) = contents.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            let frontmatter = &rest[..end];
            for line in frontmatter.lines() {
                if let Some((k, v)) = line.split_once(':') {
                    let k = k.trim();
                    let v = v.trim();
                    match k {
                        "attempt" => attempt = v.parse().unwrap_or(0),
                        "worker" => {
                            if !v.is_empty() {
                                worker = Some(v.to_string())
                            }
                        }
                        _ => {}
                    }
                }
            }
            body_start = 4 + end + 5;
        }
    }
    let prompt = contents.get(body_start..).unwrap_or("").to_string();
    Task {
        issue,
        wave,
        state,
        attempt,
        worker,
        prompt,
        estimate_sec: None,
        timeout_sec: None,
    }
}

fn render_task_file(task: &Task) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("issue: {}\n", task.issue));
    out.push_str(&format!("wave: {}\n", task.wave));
    out.push_str(&format!("attempt: {}\n", task.attempt));
    if let Some(w) = &task.worker {
        out.push_str(&format!("worker: {w}\n"));
    }
    out.push_str("---\n");
    out.push_str(&task.prompt);
    out
}

impl FsQueueStore {
    /// Creates a new task in `Blocked` state within its wave.
    pub fn create(&self, task: &Task) -> Result<()> {
        self.ensure_wave_dirs(task.wave)?;
        let path = self.state_dir(task.wave, TaskState::Blocked).join(Self::file_name(task.issue));
        atomic_write(&path, render_task_file(task).as_bytes())
    }
}

impl QueueStore for FsQueueStore {
    fn list(&self, state: TaskState, wave: Option<Wave>) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        let waves: Vec<Wave> = match wave {
            Some(w) => vec![w],
            None => {
                let mut ws = Vec::new();
                if let Ok(entries) = fs::read_dir(&self.root) {
                    for entry in entries.flatten() {
                        let name = entry.file_name();
                        let name = name.to_string_lossy();
                        if let Some(rest) = name.strip_prefix("wave-") {
                            if let Ok(w) = rest.parse::<Wave>() {
                                ws.push(w);
                            }
                        }
                    }
                }
                ws
            }
        };

        for w in waves {
            if state == TaskState::Claimed {
                let claimed_base = self.wave_dir(w).join("claimed");
                if let Ok(workers) = fs::read_dir(&claimed_base) {
                    for worker_entry in workers.flatten() {
                        if let Ok(files) = fs::read_dir(worker_entry.path()) {
                            for f in files.flatten() {
                                if let Some(n) = issue_from_filename(&f.file_name().to_string_lossy()) {
                                    out.push(n);
                                }
                            }
                        }
                    }
                }
            } else {
                let dir = self.state_dir(w, state);
                if let Ok(entries) = fs::read_dir(&dir) {
                    for entry in entries.flatten() {
                        if let Some(n) = issue_from_filename(&entry.file_name().to_string_lossy()) {
                            out.push(n);
                        }
                    }
                }
            }
        }
        // Lexicographic ordering by filename string, e.g. "10" < "100" < "2".
        out.sort_by_key(|n| n.to_string());
        Ok(out)
    }

    fn get(&self, issue: u64) -> Result<Option<Task>> {
        let Some((wave, state, _worker, path)) = self.locate(issue)? else {
            return Ok(None);
        };
        let contents = fs::read_to_string(&path)?;
        Ok(Some(parse_task_file(&contents, issue, wave, state)))
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
        let Some((wave, current_state, worker, from_path)) = self.locate(issue)? else {
            return Err(anyhow!("issue {issue} not found in queue"));
        };
        if current_state != from {
            if current_state == to {
                return Ok(TransitionOutcome::AlreadyInState);
            }
            return Err(SlapsError::InvalidTransition {
                issue,
                from: current_state.as_str(),
                to: to.as_str(),
            }
            .into());
        }

        let to_dir = if to == TaskState::Claimed {
            // The directory location doesn't carry the worker id until
            // after this move; read it from the frontmatter, which
            // `set_worker` must be called to populate before claiming.
            let contents = fs::read_to_string(&from_path)?;
            let parsed = parse_task_file(&contents, issue, wave, current_state);
            let worker = parsed
                .worker
                .or(worker)
                .ok_or_else(|| anyhow!("transition to claimed requires a worker id"))?;
            let dir = self.claimed_dir(wave, &worker);
            fs::create_dir_all(&dir)?;
            dir
        } else {
            let dir = self.state_dir(wave, to);
            fs::create_dir_all(&dir)?;
            dir
        };
        let to_path = to_dir.join(Self::file_name(issue));
        fs::rename(&from_path, &to_path)
            .with_context(|| format!("renaming {from_path:?} -> {to_path:?}"))?;
        tracing::debug!(issue, from = from.as_str(), to = to.as_str(), "task transitioned");
        Ok(TransitionOutcome::Moved)
    }

    fn set_attempt(&self, issue: u64, attempt: u32) -> Result<()> {
        let Some((_, _, _, path)) = self.locate(issue)? else {
            return Err(anyhow!("issue {issue} not found in queue"));
        };
        rewrite_frontmatter_field(&path, "attempt", &attempt.to_string())
    }

    fn set_worker(&self, issue: u64, worker: Option<&str>) -> Result<()> {
        let Some((_, state, current_worker, path)) = self.locate(issue)? else {
            return Err(anyhow!("issue {issue} not found in queue"));
        };
        if state == TaskState::Claimed {
            // Claim ownership is expressed by directory placement, not the
            // frontmatter field; moving directories is the transition's job.
            let _ = current_worker;
        }
        match worker {
            Some(w) => rewrite_frontmatter_field(&path, "worker", w),
            None => rewrite_frontmatter_field(&path, "worker", ""),
        }
    }

    fn append_footer(&self, issue: u64, footer: &str) -> Result<()> {
        let Some((_, _, _, path)) = self.locate(issue)? else {
            return Err(anyhow!("issue {issue} not found in queue"));
        };
        let mut contents = fs::read_to_string(&path).unwrap_or_default();
        contents.push_str("\n\n");
        contents.push_str(footer);
        // Best-effort: a write failure here must never propagate into the
        // caller's transition outcome.
        let _ = atomic_write(&path, contents.as_bytes());
        Ok(())
    }

    fn set_prompt(&self, issue: u64, prompt: &str) -> Result<()> {
        let Some((_, _, _, path)) = self.locate(issue)? else {
            return Err(anyhow!("issue {issue} not found in queue"));
        };
        rewrite_body(&path, prompt)
    }
}

/// Replaces the body after the frontmatter's closing `---`, leaving the
/// frontmatter block untouched.
fn rewrite_body(path: &Path, new_body: &str) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    let mut out = String::new();
    if let Some(rest) = contents.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            out.push_str("---\n");
            out.push_str(&rest[..end]);
            out.push_str("\n---\n");
            out.push_str(new_body);
            return atomic_write(path, out.as_bytes());
        }
    }
    atomic_write(path, new_body.as_bytes())
}

fn rewrite_frontmatter_field(path: &Path, key: &str, value: &str) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    let mut lines: Vec<String> = Vec::new();
    let mut in_frontmatter = false;
    let mut set = false;
    let mut body_lines: Vec<&str> = Vec::new();
    let mut seen_close = false;
    for (i, line) in contents.lines().enumerate() {
        if i == 0 && line == "---" {
            in_frontmatter = true;
            lines.push(line.to_string());
            continue;
        }
        if in_frontmatter && line == "---" {
            if !set {
                lines.push(format!("{key}: {value}"));
            }
            lines.push(line.to_string());
            in_frontmatter = false;
            seen_close = true;
            continue;
        }
        if in_frontmatter {
            if let Some((k, _)) = line.split_once(':') {
                if k.trim() == key {
                    lines.push(format!("{key}: {value}"));
                    set = true;
                    continue;
                }
            }
            lines.push(line.to_string());
        } else if seen_close {
            body_lines.push(line);
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    if !body_lines.is_empty() {
        out.push_str(&body_lines.join("\n"));
    }
    atomic_write(path, out.as_bytes())
}

fn issue_from_filename(name: &str) -> Option<u64> {
    name.strip_suffix(".md")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, FsQueueStore) {
        let dir = tempdir().unwrap();
        let store = FsQueueStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_list_blocked() {
        let (_dir, store) = store();
        store.create(&Task::new(42, 1, "do the thing")).unwrap();
        let blocked = store.list(TaskState::Blocked, Some(1)).unwrap();
        assert_eq!(blocked, vec![42]);
    }

    #[test]
    fn happy_path_transition_sequence() {
        let (_dir, store) = store();
        store.create(&Task::new(7, 1, "body")).unwrap();
        store.set_worker(7, Some("w1")).unwrap();

        store
            .transition(7, TaskState::Blocked, TaskState::Open)
            .unwrap();
        assert_eq!(store.list(TaskState::Open, Some(1)).unwrap(), vec![7]);

        store
            .transition(7, TaskState::Open, TaskState::Claimed)
            .unwrap();
        assert_eq!(store.list(TaskState::Claimed, Some(1)).unwrap(), vec![7]);

        store
            .transition(7, TaskState::Claimed, TaskState::Closed)
            .unwrap();
        assert_eq!(store.list(TaskState::Closed, Some(1)).unwrap(), vec![7]);
    }

    #[test]
    fn invalid_transition_is_rejected_without_mutation() {
        let (_dir, store) = store();
        store.create(&Task::new(1, 1, "body")).unwrap();
        let err = store.transition(1, TaskState::Blocked, TaskState::Closed);
        assert!(err.is_err());
        // Task must still be blocked.
        assert_eq!(store.list(TaskState::Blocked, Some(1)).unwrap(), vec![1]);
    }

    #[test]
    fn failure_to_dead_via_attempt_ledger_path() {
        let (_dir, store) = store();
        store.create(&Task::new(3, 1, "body")).unwrap();
        store.set_worker(3, Some("w1")).unwrap();
        store
            .transition(3, TaskState::Blocked, TaskState::Open)
            .unwrap();
        store
            .transition(3, TaskState::Open, TaskState::Claimed)
            .unwrap();
        store
            .transition(3, TaskState::Claimed, TaskState::Failure)
            .unwrap();
        store.transition(3, TaskState::Failure, TaskState::Dead).unwrap();
        assert_eq!(store.list(TaskState::Dead, Some(1)).unwrap(), vec![3]);
    }

    #[test]
    fn lexicographic_claim_order_matches_spec_example() {
        let (_dir, store) = store();
        for issue in [2u64, 10, 100] {
            store.create(&Task::new(issue, 1, "body")).unwrap();
            store
                .transition(issue, TaskState::Blocked, TaskState::Open)
                .unwrap();
        }
        let open = store.list(TaskState::Open, Some(1)).unwrap();
        assert_eq!(open, vec![10, 100, 2]);
    }

    #[test]
    fn append_footer_is_best_effort_and_preserves_state() {
        let (_dir, store) = store();
        store.create(&Task::new(5, 1, "body")).unwrap();
        store.append_footer(5, "FAILURE: boom").unwrap();
        let task = store.get(5).unwrap().unwrap();
        assert!(task.prompt.contains("FAILURE: boom"));
        assert_eq!(task.state, TaskState::Blocked);
    }

    #[test]
    fn set_attempt_persists_across_get() {
        let (_dir, store) = store();
        store.create(&Task::new(9, 1, "body")).unwrap();
        store.set_attempt(9, 2).unwrap();
        let task = store.get(9).unwrap().unwrap();
        assert_eq!(task.attempt, 2);
    }

    #[test]
    fn get_missing_issue_returns_none() {
        let (_dir, store) = store();
        assert!(store.get(999).unwrap().is_none());
    }

    #[test]
    fn transition_missing_issue_errors() {
        let (_dir, store) = store();
        let err = store.transition(999, TaskState::Blocked, TaskState::Open);
        assert!(err.is_err());
    }

    #[test]
    fn repeating_same_transition_reports_already_in_state() {
        let (_dir, store) = store();
        store.create(&Task::new(4, 1, "body")).unwrap();
        store
            .transition(4, TaskState::Blocked, TaskState::Open)
            .unwrap();
        let outcome = store.transition(4, TaskState::Blocked, TaskState::Open);
        // from-state no longer matches (already open) -> AlreadyInState since
        // the caller's `to` equals the current state.
        assert!(matches!(outcome, Ok(TransitionOutcome::AlreadyInState)));
    }

    #[test]
    fn atomic_write_survives_missing_parent_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }
}
