//! End-to-end seed scenarios that cross queue/depgraph/watcher/worker
//! boundaries, run against a real `FsQueueStore` on a temp directory rather
//! than the inline per-module fakes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use slaps_core::depgraph::DependencyIndex;
use slaps_core::domain::{Task, TaskState};
use slaps_core::ledger::AttemptLedger;
use slaps_core::estimator::Estimator;
use slaps_core::ports::{LlmOutcome, LlmRunner};
use slaps_core::progress::EventLog;
use slaps_core::queue::fs::FsQueueStore;
use slaps_core::queue::QueueStore;
use slaps_core::watcher::{ClosedMarkers, Watcher};
use slaps_core::worker::Worker;

struct ScriptedLlm {
    task_always_fails: bool,
}

impl LlmRunner for ScriptedLlm {
    fn run(&self, prompt: &str, _timeout: Duration) -> anyhow::Result<LlmOutcome> {
        if prompt.contains("Estimate how many minutes") {
            return Ok(LlmOutcome {
                exit_code: 0,
                stdout: "5 minutes".to_string(),
                stderr: String::new(),
            });
        }
        if prompt.contains("Summarize what was tried") {
            return Ok(LlmOutcome {
                exit_code: 0,
                stdout: "Tried the naive approach, now trying the fix because it failed"
                    .to_string(),
                stderr: String::new(),
            });
        }
        // The guardrail-prefixed task prompt itself.
        Ok(LlmOutcome {
            exit_code: if self.task_always_fails { 1 } else { 0 },
            stdout: String::new(),
            stderr: "simulated failure".to_string(),
        })
    }
}

fn harness(
    dir: &std::path::Path,
    llm: Arc<dyn LlmRunner>,
) -> (
    Arc<FsQueueStore>,
    Watcher,
    Worker,
    Arc<EventLog>,
    Arc<Mutex<DependencyIndex>>,
) {
    let queue = Arc::new(FsQueueStore::new(dir).unwrap());
    let ledger = Arc::new(AttemptLedger::new(dir).unwrap());
    let markers = ClosedMarkers::new(dir).unwrap();
    let events = Arc::new(EventLog::open(dir.join("logs")).unwrap());
    let depgraph = Arc::new(Mutex::new(DependencyIndex::new()));
    let estimator = Arc::new(Estimator::new(dir, llm.clone()).unwrap());

    let watcher = Watcher::new(
        1,
        queue.clone(),
        depgraph.clone(),
        ledger.clone(),
        markers,
        llm.clone(),
        events.clone(),
    );
    let worker = Worker::new("w1", 1, queue.clone(), llm, estimator, events.clone());
    (queue, watcher, worker, events, depgraph)
}

/// A task that always succeeds goes blocked -> open -> claimed -> closed in
/// one worker tick, and the coordinator-visible event log records both the
/// claim and the success.
#[test]
fn successful_task_runs_to_closed_and_emits_events() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlm {
        task_always_fails: false,
    });
    let (queue, watcher, worker, events, _depgraph) = harness(dir.path(), llm);

    queue.create(&Task::new(1, 1, "do the thing")).unwrap();
    queue
        .transition(1, TaskState::Blocked, TaskState::Open)
        .unwrap();

    assert!(worker.run_once().unwrap());
    assert_eq!(queue.get(1).unwrap().unwrap().state, TaskState::Closed);

    watcher.tick().unwrap();
    let _ = events; // event log is append-only and exercised above via run_once

    let log = std::fs::read_to_string(dir.path().join("logs").join("events.jsonl")).unwrap();
    assert!(log.lines().any(|l| l.contains("\"claimed\"")));
    assert!(log.lines().any(|l| l.contains("\"success\"")));
}

/// A task that always fails gets reopened twice with remediation prompts
/// prepended, then dead-lettered on the third failure — driving the worker
/// and watcher together through the full retry budget.
#[test]
fn failing_task_retries_then_dead_letters() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlm {
        task_always_fails: true,
    });
    let (queue, watcher, worker, _events, _depgraph) = harness(dir.path(), llm);

    queue.create(&Task::new(9, 1, "flaky task")).unwrap();
    queue
        .transition(9, TaskState::Blocked, TaskState::Open)
        .unwrap();

    for _ in 0..3 {
        assert!(worker.run_once().unwrap());
        assert_eq!(queue.get(9).unwrap().unwrap().state, TaskState::Failure);
        watcher.tick().unwrap();
    }

    let task = queue.get(9).unwrap().unwrap();
    assert_eq!(task.state, TaskState::Dead);
    assert!(task.prompt.contains("DEAD LETTER"));
    assert_eq!(watcher.dead_count().unwrap(), 1);
}

/// A dependent blocked on two upstream tasks only opens once both close,
/// and then a worker can immediately claim and run it.
#[test]
fn dependent_unlocks_after_both_blockers_close_and_worker_picks_it_up() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlm {
        task_always_fails: false,
    });
    let (queue, watcher, worker, _events, depgraph) = harness(dir.path(), llm);

    queue.create(&Task::new(1, 1, "blocker one")).unwrap();
    queue.create(&Task::new(2, 1, "blocker two")).unwrap();
    queue.create(&Task::new(3, 1, "dependent")).unwrap();

    {
        let mut g = depgraph.lock().unwrap();
        g.add_edge(1, 3);
        g.add_edge(2, 3);
    }

    for issue in [1u64, 2] {
        queue
            .transition(issue, TaskState::Blocked, TaskState::Open)
            .unwrap();
    }

    assert!(worker.run_once().unwrap());
    assert!(worker.run_once().unwrap());
    watcher.tick().unwrap();

    assert_eq!(queue.get(3).unwrap().unwrap().state, TaskState::Open);

    assert!(worker.run_once().unwrap());
    assert_eq!(queue.get(3).unwrap().unwrap().state, TaskState::Closed);
}

