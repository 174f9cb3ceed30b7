//! C10: the progress reporter.
//!
//! All components emit structured events to one append-only JSON-lines
//! stream. Grounded on the teacher's `worker/event_log.rs`: `emit` injects
//! `ts`, writes are best-effort (a logging failure never becomes a task
//! failure), and typed helper methods exist per event kind named in
//! `spec.md` §6.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{json, Value};

pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(EventLog {
            path: dir.join("events.jsonl"),
            lock: Mutex::new(()),
        })
    }

    /// Emits one event. Injects `ts` if not already present. Never panics:
    /// a write failure is swallowed, matching the teacher's best-effort
    /// event_log discipline.
    pub fn emit(&self, mut fields: Value) {
        if let Value::Object(map) = &mut fields {
            map.entry("ts").or_insert_with(|| {
                Value::String(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string())
            });
        }
        let _guard = self.lock.lock().unwrap();
        let line = match serde_json::to_string(&fields) {
            Ok(l) => l,
            Err(_) => return,
        };
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }

    pub fn moved(&self, issue: u64, from: &str, to: &str, worker: Option<&str>) {
        self.emit(json!({"event": "move", "task": issue, "from": from, "to": to, "worker": worker}));
    }

    pub fn retry(&self, issue: u64, attempt: u32) {
        self.emit(json!({"event": "retry", "task": issue, "attempt": attempt}));
    }

    pub fn claimed(&self, issue: u64, worker: &str) {
        self.emit(json!({"event": "claimed", "task": issue, "worker": worker}));
    }

    pub fn success(&self, issue: u64, worker: &str) {
        self.emit(json!({"event": "success", "task": issue, "worker": worker}));
    }

    pub fn failure_reopen(&self, issue: u64, worker: &str, rc: i32) {
        self.emit(json!({"event": "failure_reopen", "task": issue, "worker": worker, "rc": rc}));
    }

    pub fn dead(&self, issue: u64, attempt: u32) {
        self.emit(json!({"event": "dead", "task": issue, "attempt": attempt}));
    }

    pub fn unlock_open(&self, issue: u64) {
        self.emit(json!({"event": "unlock_open", "task": issue}));
    }

    pub fn doctor_pass(&self, wave: u32) {
        self.emit(json!({"event": "doctor_pass", "wave": wave}));
    }

    pub fn doctor_fail(&self, wave: u32, reason: &str) {
        self.emit(json!({"event": "doctor_fail", "wave": wave, "reason": reason}));
    }

    pub fn degraded(&self, reason: &str) {
        self.emit(json!({"event": "degraded", "reason": reason}));
    }

    pub fn cache_stats(&self, hits: u64, misses: u64) {
        self.emit(json!({"event": "cache_stats", "hits": hits, "misses": misses}));
    }

    pub fn cache_stats_warning(&self, hit_rate: f64, threshold: f64) {
        self.emit(json!({
            "event": "cache_stats_warning",
            "hit_rate": hit_rate,
            "threshold": threshold,
        }));
    }

    pub fn wave_start(&self, wave: u32) {
        self.emit(json!({"event": "wave_start", "wave": wave}));
    }

    pub fn wave_complete(&self, wave: u32) {
        self.emit(json!({"event": "wave_complete", "wave": wave}));
    }

    pub fn all_complete(&self) {
        self.emit(json!({"event": "all_complete"}));
    }

    pub fn claim_corruption(&self, issue: u64, worker: &str) {
        self.emit(json!({"event": "move", "task": issue, "to": "failed", "worker": worker, "reason": "claim_corruption"}));
    }
}

/// Counts used to render a per-worker human-readable progress report.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaveCounts {
    pub blocked: u64,
    pub open: u64,
    pub claimed: u64,
    pub closed: u64,
    pub failure: u64,
    pub dead: u64,
}

impl WaveCounts {
    pub fn total(&self) -> u64 {
        self.blocked + self.open + self.claimed + self.closed + self.failure + self.dead
    }

    /// Renders the periodic human-readable line: per-category counts plus
    /// a `progressed/total` bar, following the teacher's banner style in
    /// `worker/poll.rs::run_worker_loop`.
    pub fn render(&self) -> String {
        let progressed = self.closed + self.dead;
        format!(
            "[progress] {}/{} done (closed {}, dead {}) | blocked {} open {} claimed {} failing {}",
            progressed,
            self.total(),
            self.closed,
            self.dead,
            self.blocked,
            self.open,
            self.claimed,
            self.failure,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn emit_injects_timestamp() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.emit(json!({"event": "test"}));
        let contents = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let parsed: Value = serde_json::from_str(contents.trim()).unwrap();
        assert!(parsed.get("ts").is_some());
    }

    #[test]
    fn emit_appends_multiple_lines() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.claimed(1, "w1");
        log.success(1, "w1");
        let contents = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn wave_counts_progress_bar() {
        let counts = WaveCounts {
            blocked: 1,
            open: 2,
            claimed: 1,
            closed: 5,
            failure: 0,
            dead: 1,
        };
        assert_eq!(counts.total(), 10);
        let line = counts.render();
        assert!(line.contains("6/10"));
    }
}
