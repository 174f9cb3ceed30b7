//! C3: the attempt ledger.
//!
//! One counter file per issue under `admin/attempts/<issue>.count`, plus a
//! human-readable reason log under `failures/reasons/<issue>.txt`. Uses the
//! same atomic-write-then-rename primitive as the queue store so a crash
//! mid-write never leaves a half-written counter.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::queue::fs::atomic_write;

pub const MAX_ATTEMPTS: u32 = 3;

pub struct AttemptLedger {
    attempts_dir: PathBuf,
    reasons_dir: PathBuf,
}

impl AttemptLedger {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let attempts_dir = root.join("admin").join("attempts");
        let reasons_dir = root.join("failures").join("reasons");
        fs::create_dir_all(&attempts_dir)?;
        fs::create_dir_all(&reasons_dir)?;
        Ok(AttemptLedger {
            attempts_dir,
            reasons_dir,
        })
    }

    fn path(&self, issue: u64) -> PathBuf {
        self.attempts_dir.join(format!("{issue}.count"))
    }

    pub fn get(&self, issue: u64) -> u32 {
        fs::read_to_string(self.path(issue))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Increments and persists the counter, returning the new value. Called
    /// exactly once per routed failure, before any remediation prompt is
    /// composed.
    pub fn increment(&self, issue: u64) -> Result<u32> {
        let next = self.get(issue) + 1;
        atomic_write(&self.path(issue), next.to_string().as_bytes())?;
        Ok(next)
    }

    pub fn is_dead_letter(attempt: u32) -> bool {
        attempt >= MAX_ATTEMPTS
    }

    /// Appends an "Attempt number N" reason paragraph to the per-issue
    /// reason log. Best-effort: append failures must not prevent the task
    /// move that triggered them.
    pub fn append_reason(&self, issue: u64, attempt: u32, reason: &str) -> Result<()> {
        let path = self.reasons_dir.join(format!("{issue}.txt"));
        let mut existing = fs::read_to_string(&path).unwrap_or_default();
        if !existing.is_empty() {
            existing.push_str("\n\n");
        }
        existing.push_str(&format!("Attempt number {attempt}: {reason}"));
        let _ = atomic_write(&path, existing.as_bytes());
        Ok(())
    }
}
