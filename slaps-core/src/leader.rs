//! C6: leader lease.
//!
//! Only relevant to the server-fields backend. A single heartbeat record
//! names the current leader; any process reading a stale heartbeat may
//! atomically overwrite it with its own. Server-mutating work (transitions,
//! attempt increments, unlock sweeps, cache refresh) is leader-only.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::domain::LeaderHeartbeat;
use crate::ports::Clock;
use crate::queue::fs::atomic_write;

pub struct LeaderLease {
    path: PathBuf,
    ttl_sec: u64,
}

impl LeaderLease {
    pub fn new(root: impl AsRef<Path>, ttl_sec: u64) -> Self {
        LeaderLease {
            path: root.as_ref().join("admin").join("leader.json"),
            ttl_sec,
        }
    }

    fn read(&self) -> Option<LeaderHeartbeat> {
        let contents = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Attempts to become (or remain) leader as `candidate_id`. Returns
    /// `true` if this process is leader after the call.
    pub fn try_become_leader(&self, candidate_id: &str, clock: &dyn Clock) -> Result<bool> {
        let now = clock.now();
        match self.read() {
            Some(hb) if hb.leader_id == candidate_id => {
                self.write_heartbeat(candidate_id, now)?;
                Ok(true)
            }
            Some(hb) if !hb.is_stale(now, self.ttl_sec) => {
                tracing::debug!(candidate = candidate_id, leader = %hb.leader_id, "leader lease held by another process");
                Ok(false)
            }
            Some(hb) => {
                tracing::info!(candidate = candidate_id, previous_leader = %hb.leader_id, "taking over stale leader lease");
                self.write_heartbeat(candidate_id, now)?;
                Ok(true)
            }
            None => {
                tracing::info!(candidate = candidate_id, "becoming leader");
                self.write_heartbeat(candidate_id, now)?;
                Ok(true)
            }
        }
    }

    pub fn is_leader(&self, id: &str, clock: &dyn Clock) -> bool {
        match self.read() {
            Some(hb) => hb.leader_id == id && !hb.is_stale(clock.now(), self.ttl_sec),
            None => false,
        }
    }

    fn write_heartbeat(&self, id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let hb = LeaderHeartbeat {
            leader_id: id.to_string(),
            at,
        };
        atomic_write(&self.path, serde_json::to_string(&hb)?.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::tempdir;

    struct FixedClock(RefCell<chrono::DateTime<chrono::Utc>>);
    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            *self.0.borrow()
        }
    }
    impl FixedClock {
        fn new() -> Self {
            FixedClock(RefCell::new(chrono::Utc::now()))
        }
        fn advance(&self, secs: i64) {
            let mut t = self.0.borrow_mut();
            *t += chrono::Duration::seconds(secs);
        }
    }

    #[test]
    fn first_candidate_becomes_leader() {
        let dir = tempdir().unwrap();
        let lease = LeaderLease::new(dir.path(), 15);
        let clock = FixedClock::new();
        assert!(lease.try_become_leader("a", &clock).unwrap());
    }

    #[test]
    fn second_candidate_is_refused_while_fresh() {
        let dir = tempdir().unwrap();
        let lease = LeaderLease::new(dir.path(), 15);
        let clock = FixedClock::new();
        assert!(lease.try_become_leader("a", &clock).unwrap());
        assert!(!lease.try_become_leader("b", &clock).unwrap());
    }

    #[test]
    fn stale_heartbeat_allows_takeover() {
        let dir = tempdir().unwrap();
        let lease = LeaderLease::new(dir.path(), 15);
        let clock = FixedClock::new();
        assert!(lease.try_become_leader("a", &clock).unwrap());
        clock.advance(20);
        assert!(lease.try_become_leader("b", &clock).unwrap());
        assert!(lease.is_leader("b", &clock));
        assert!(!lease.is_leader("a", &clock));
    }

    #[test]
    fn incumbent_can_refresh_its_own_heartbeat() {
        let dir = tempdir().unwrap();
        let lease = LeaderLease::new(dir.path(), 15);
        let clock = FixedClock::new();
        assert!(lease.try_become_leader("a", &clock).unwrap());
        clock.advance(10);
        assert!(lease.try_become_leader("a", &clock).unwrap());
        clock.advance(10); // 20s since last refresh would be stale, but only 10 elapsed
        assert!(lease.is_leader("a", &clock));
    }
}
