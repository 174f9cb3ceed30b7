//! Shared domain types: task state machine, wave, dependency edge, lease.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The six states a task occupies over its lifetime within a wave.
///
/// `Failure` is transient: the watcher either reopens the task (attempt + 1)
/// or routes it to `Dead` once the attempt count would exceed the retry
/// budget (see [`crate::ledger`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Blocked,
    Open,
    Claimed,
    Closed,
    Failure,
    Dead,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Blocked => "blocked",
            TaskState::Open => "open",
            TaskState::Claimed => "claimed",
            TaskState::Closed => "closed",
            TaskState::Failure => "failure",
            TaskState::Dead => "dead",
        }
    }

    /// `true` for the two states that end a task's involvement in a wave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Closed | TaskState::Dead)
    }

    pub fn parse(s: &str) -> Option<TaskState> {
        match s.to_ascii_lowercase().as_str() {
            "blocked" => Some(TaskState::Blocked),
            "open" => Some(TaskState::Open),
            "claimed" => Some(TaskState::Claimed),
            "closed" => Some(TaskState::Closed),
            "failure" => Some(TaskState::Failure),
            "dead" => Some(TaskState::Dead),
            _ => None,
        }
    }

    /// Every directed edge of the state machine in `spec.md` §4.5.
    ///
    /// Used by the queue store to reject invalid transitions at the store
    /// boundary rather than relying on callers to behave.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Blocked, Open)
                | (Open, Claimed)
                | (Claimed, Closed)
                | (Claimed, Failure)
                | (Failure, Open)
                | (Failure, Dead)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A positive wave number. Wave 1 is the first milestone.
pub type Wave = u32;

/// One task, identified by its GitHub issue number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub issue: u64,
    pub wave: Wave,
    pub state: TaskState,
    pub attempt: u32,
    pub worker: Option<String>,
    pub prompt: String,
    pub estimate_sec: Option<u64>,
    pub timeout_sec: Option<u64>,
}

impl Task {
    pub fn new(issue: u64, wave: Wave, prompt: impl Into<String>) -> Self {
        Task {
            issue,
            wave,
            state: TaskState::Blocked,
            attempt: 0,
            worker: None,
            prompt: prompt.into(),
            estimate_sec: None,
            timeout_sec: None,
        }
    }
}

/// A directed blocker -> dependent edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub blocker: u64,
    pub dependent: u64,
}

/// A short-lived record asserting that a worker intends to claim a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    pub pid: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub est_timeout_sec: u64,
}

/// The single record naming the current server-backend leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderHeartbeat {
    pub leader_id: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl LeaderHeartbeat {
    pub fn is_stale(&self, now: chrono::DateTime<chrono::Utc>, ttl_sec: u64) -> bool {
        let age = now.signed_duration_since(self.at);
        age.num_seconds() >= ttl_sec as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_edges_are_allowed() {
        assert!(TaskState::Blocked.can_transition_to(TaskState::Open));
        assert!(TaskState::Open.can_transition_to(TaskState::Claimed));
        assert!(TaskState::Claimed.can_transition_to(TaskState::Closed));
        assert!(TaskState::Claimed.can_transition_to(TaskState::Failure));
        assert!(TaskState::Failure.can_transition_to(TaskState::Open));
        assert!(TaskState::Failure.can_transition_to(TaskState::Dead));
    }

    #[test]
    fn task_never_reenters_blocked() {
        for from in [
            TaskState::Open,
            TaskState::Claimed,
            TaskState::Closed,
            TaskState::Failure,
            TaskState::Dead,
        ] {
            assert!(!from.can_transition_to(TaskState::Blocked));
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for to in [
            TaskState::Blocked,
            TaskState::Open,
            TaskState::Claimed,
            TaskState::Closed,
            TaskState::Failure,
            TaskState::Dead,
        ] {
            assert!(!TaskState::Closed.can_transition_to(to));
            assert!(!TaskState::Dead.can_transition_to(to));
        }
    }

    #[test]
    fn parse_round_trips_as_str() {
        for s in ["blocked", "open", "claimed", "closed", "failure", "dead"] {
            let parsed = TaskState::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(TaskState::parse("OPEN"), Some(TaskState::Open));
        assert_eq!(TaskState::parse("Dead"), Some(TaskState::Dead));
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(TaskState::parse("bogus"), None);
    }

    #[test]
    fn is_terminal_matches_closed_and_dead_only() {
        for s in [
            TaskState::Blocked,
            TaskState::Open,
            TaskState::Claimed,
            TaskState::Failure,
        ] {
            assert!(!s.is_terminal());
        }
        assert!(TaskState::Closed.is_terminal());
        assert!(TaskState::Dead.is_terminal());
    }

    #[test]
    fn heartbeat_staleness() {
        let now = chrono::Utc::now();
        let hb = LeaderHeartbeat {
            leader_id: "a".into(),
            at: now - chrono::Duration::seconds(20),
        };
        assert!(hb.is_stale(now, 15));
        assert!(!hb.is_stale(now, 30));
    }
}
