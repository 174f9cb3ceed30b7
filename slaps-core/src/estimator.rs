//! C9: per-attempt duration estimate and timeout derivation.
//!
//! For each claimed task, load any cached estimate keyed by `(issue,
//! attempt)`. If absent, ask the LLM for an integer number of minutes,
//! parse the first integer found, defaulting to 20 minutes on parse
//! failure. Timeout is `clamp(2 * estimate_sec, 600, 7200)`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::ports::LlmRunner;
use crate::queue::fs::atomic_write;

const DEFAULT_ESTIMATE_MIN: u64 = 20;
const MIN_TIMEOUT_SEC: u64 = 600;
const MAX_TIMEOUT_SEC: u64 = 7200;
const ESTIMATE_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Estimator {
    dir: PathBuf,
    llm: Arc<dyn LlmRunner>,
}

impl Estimator {
    pub fn new(root: impl AsRef<Path>, llm: Arc<dyn LlmRunner>) -> Result<Self> {
        let dir = root.as_ref().join("admin").join("estimates");
        fs::create_dir_all(&dir)?;
        Ok(Estimator { dir, llm })
    }

    fn path(&self, issue: u64, attempt: u32) -> PathBuf {
        self.dir.join(format!("{issue}-{attempt}.json"))
    }

    /// Returns the per-attempt timeout in seconds, estimating (and
    /// persisting the estimate) if this attempt has not been seen before.
    pub fn timeout_for(&self, issue: u64, attempt: u32) -> Result<u64> {
        let estimate_sec = self.estimate_for(issue, attempt)?;
        Ok(derive_timeout(estimate_sec))
    }

    fn estimate_for(&self, issue: u64, attempt: u32) -> Result<u64> {
        let path = self.path(issue, attempt);
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&contents) {
                if let Some(sec) = v.get("estimate_sec").and_then(|n| n.as_u64()) {
                    return Ok(sec);
                }
            }
        }

        let prompt = "Estimate how many minutes this task will take. \
                      Respond with a single integer number of minutes.";
        let minutes = match self.llm.run(prompt, ESTIMATE_QUERY_TIMEOUT) {
            Ok(outcome) if outcome.succeeded() => {
                parse_first_integer(&outcome.stdout).unwrap_or(DEFAULT_ESTIMATE_MIN)
            }
            _ => DEFAULT_ESTIMATE_MIN,
        };
        let estimate_sec = minutes * 60;
        let _ = atomic_write(
            &path,
            serde_json::json!({"estimate_sec": estimate_sec}).to_string().as_bytes(),
        );
        Ok(estimate_sec)
    }
}

fn derive_timeout(estimate_sec: u64) -> u64 {
    (2 * estimate_sec).clamp(MIN_TIMEOUT_SEC, MAX_TIMEOUT_SEC)
}

fn parse_first_integer(s: &str) -> Option<u64> {
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::LlmOutcome;
    use tempfile::tempdir;

    struct FakeLlm(String);
    impl LlmRunner for FakeLlm {
        fn run(&self, _prompt: &str, _timeout: Duration) -> Result<LlmOutcome> {
            Ok(LlmOutcome {
                exit_code: 0,
                stdout: self.0.clone(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn timeout_clamps_to_minimum() {
        assert_eq!(derive_timeout(10), MIN_TIMEOUT_SEC);
    }

    #[test]
    fn timeout_clamps_to_maximum() {
        assert_eq!(derive_timeout(10_000), MAX_TIMEOUT_SEC);
    }

    #[test]
    fn timeout_is_double_estimate_within_bounds() {
        assert_eq!(derive_timeout(1000), 2000);
    }

    #[test]
    fn parse_first_integer_extracts_leading_number() {
        assert_eq!(parse_first_integer("about 45 minutes"), Some(45));
        assert_eq!(parse_first_integer("45"), Some(45));
        assert_eq!(parse_first_integer("no number here"), None);
    }

    #[test]
    fn estimate_defaults_to_twenty_minutes_on_parse_failure() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(FakeLlm("not a number".to_string()));
        let estimator = Estimator::new(dir.path(), llm).unwrap();
        let estimate = estimator.estimate_for(1, 0).unwrap();
        assert_eq!(estimate, DEFAULT_ESTIMATE_MIN * 60);
    }

    #[test]
    fn estimate_is_persisted_and_reused() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(FakeLlm("30 minutes".to_string()));
        let estimator = Estimator::new(dir.path(), llm).unwrap();
        let first = estimator.estimate_for(1, 0).unwrap();
        assert_eq!(first, 1800);
        // A second estimator instance (simulating a new attempt to load the
        // cache) must read the persisted value, not re-query.
        let llm2 = Arc::new(FakeLlm("999 minutes".to_string()));
        let estimator2 = Estimator::new(dir.path(), llm2).unwrap();
        let second = estimator2.estimate_for(1, 0).unwrap();
        assert_eq!(second, 1800);
    }

    #[test]
    fn new_attempt_re_estimates() {
        let dir = tempdir().unwrap();
        let llm = Arc::new(FakeLlm("10 minutes".to_string()));
        let estimator = Estimator::new(dir.path(), llm).unwrap();
        let attempt0 = estimator.estimate_for(1, 0).unwrap();
        let attempt1 = estimator.estimate_for(1, 1).unwrap();
        assert_eq!(attempt0, 600);
        assert_eq!(attempt1, 600);
        // Different keys on disk even though value happens to match.
        assert!(dir.path().join("admin/estimates/1-0.json").exists());
        assert!(dir.path().join("admin/estimates/1-1.json").exists());
    }
}
