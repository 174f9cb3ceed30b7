//! Core library for SLAPS.
//!
//! Grouped by responsibility:
//!
//! - `domain` — shared types: task, state machine, wave, lease.
//! - `errors` — the `SlapsError` taxonomy used at module boundaries.
//! - `config` — environment-knob resolution (env var > config file > default).
//! - `ports` — capability interfaces injected into the watcher/worker/coordinator.
//! - `queue` — C1: filesystem and server-fields task stores.
//! - `depgraph` — C2: blocker/dependent index.
//! - `ledger` — C3: per-issue attempt counter and dead-letter policy.
//! - `worker` — C4: single-slot claim/execute/route loop.
//! - `watcher` — C5: unlock/remediation/startup-sweep event loop.
//! - `leader` — C6: heartbeat-based leader election for the fields backend.
//! - `cache` — C7: TTL-bounded item/wave snapshots.
//! - `coordinator` — C8: wave sequencing and Quality Guardian invocation.
//! - `estimator` — C9: per-attempt duration estimate and timeout derivation.
//! - `progress` — C10: structured JSONL event log and human-readable report.
//! - `ghcli` — production `GitHubApi` for the server-fields backend.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod depgraph;
pub mod domain;
pub mod errors;
pub mod estimator;
pub mod ghcli;
pub mod leader;
pub mod ledger;
pub mod ports;
pub mod progress;
pub mod queue;
pub mod watcher;
pub mod worker;

pub use errors::SlapsError;
