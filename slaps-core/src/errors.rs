//! The error taxonomy named in `spec.md` §7.
//!
//! Everywhere above the queue/ledger boundary uses `anyhow::Result`, matching
//! the rest of the crate. `SlapsError` exists so that code which must branch
//! on *why* an operation failed — the watcher deciding whether to retry a
//! rename, the coordinator deciding whether a wave aborts — can `match`
//! instead of string-sniffing an error message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlapsError {
    #[error("invalid transition for issue {issue}: {from} -> {to}")]
    InvalidTransition {
        issue: u64,
        from: &'static str,
        to: &'static str,
    },

    #[error("queue state directories span multiple filesystem devices")]
    CrossDevice,

    #[error("issue {issue} is already in state {state}")]
    AlreadyInState { issue: u64, state: &'static str },

    #[error("malformed dependency edge: {0}")]
    MalformedEdge(String),

    #[error("claimed slot for worker {worker} holds {count} files, expected 1")]
    ClaimCorruption { worker: String, count: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_names_both_states() {
        let err = SlapsError::InvalidTransition {
            issue: 42,
            from: "closed",
            to: "open",
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("closed"));
        assert!(msg.contains("open"));
    }

    #[test]
    fn io_error_wraps_transparently() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: SlapsError = io.into();
        assert!(err.to_string().contains("nope"));
    }
}
