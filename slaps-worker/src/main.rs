mod cli;
mod drain;
mod llm;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use slaps_core::cache::{ItemSnapshot, ItemsCache};
use slaps_core::config::{Backend, Config};
use slaps_core::domain::{Task, TaskState};
use slaps_core::estimator::Estimator;
use slaps_core::ghcli::GhCliApi;
use slaps_core::ports::{Clock, GitHubApi, SystemClock};
use slaps_core::progress::EventLog;
use slaps_core::queue::fields::FieldsQueueStore;
use slaps_core::queue::fs::FsQueueStore;
use slaps_core::queue::QueueStore;
use slaps_core::worker::Worker;

use drain::DrainSignal;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    drain::install_signal_handlers();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(130),
        Err(e) => {
            tracing::error!(error = %e, "slaps-worker exited with an error");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` on a normal exit, `Ok(false)` if interrupted.
fn run() -> Result<bool> {
    let args = cli::Cli::parse();
    let cfg = Config::load();
    let wave = args.wave.unwrap_or(cfg.wave);
    let worker_count = args.workers.unwrap_or(cfg.workers);

    std::fs::create_dir_all(&cfg.slaps_dir)?;
    let queue = build_queue(&cfg)?;
    let events = Arc::new(EventLog::open(cfg.slaps_dir.join("logs"))?);
    let llm = Arc::new(llm::ProcessLlmRunner::new("claude"));
    let estimator = Arc::new(Estimator::new(&cfg.slaps_dir, llm.clone())?);
    let drain_signal = DrainSignal::new(&cfg.slaps_dir);

    tracing::info!(wave, workers = worker_count, backend = ?cfg.backend, "slaps-worker starting");

    let mut interrupted = false;
    thread::scope(|scope| {
        for n in 0..worker_count {
            let worker_id = format!("{}-{n}", hostname());
            let worker = Worker::new(
                worker_id,
                wave,
                queue.clone(),
                llm.clone(),
                estimator.clone(),
                events.clone(),
            );
            let drain_ref = &drain_signal;
            let once = args.once;
            scope.spawn(move || worker_loop(&worker, drain_ref, once));
        }
    });
    if drain::interrupted() {
        interrupted = true;
    }
    Ok(!interrupted)
}

/// Builds the worker pool's `QueueStore`. For the fields backend, a worker
/// process only ever reads the project through the [`ItemsCache`] the
/// coordinator's leader keeps fresh — a worker never elects itself leader
/// or writes the snapshot, it just mirrors whatever the cache holds (or
/// does one live `gh` read on a cold start with no cache yet).
fn build_queue(cfg: &Config) -> Result<Arc<dyn QueueStore>> {
    match cfg.backend {
        Backend::Fs => Ok(Arc::new(FsQueueStore::new(&cfg.slaps_dir)?)),
        Backend::Fields => {
            let owner = cfg
                .gh_owner
                .clone()
                .ok_or_else(|| anyhow!("SLAPS_GH_OWNER is required when backend=fields"))?;
            let project = cfg
                .gh_project
                .ok_or_else(|| anyhow!("SLAPS_GH_PROJECT is required when backend=fields"))?;
            let api = Arc::new(GhCliApi::new(owner, project, cfg.gh_repo.clone()));

            let tasks = fetch_tasks_preferring_cache(cfg, &api)?;
            let api_dyn: Arc<dyn GitHubApi> = api;
            let store = Arc::new(FieldsQueueStore::new(
                api_dyn,
                cfg.slaps_dir.join("admin").join("leases"),
            )?);
            store.sync_from(tasks);
            Ok(store)
        }
    }
}

fn fetch_tasks_preferring_cache(cfg: &Config, api: &Arc<GhCliApi>) -> Result<Vec<Task>> {
    let cache = ItemsCache::new(&cfg.slaps_dir, cfg.refresh_interval_sec);
    let clock = SystemClock;
    let now = clock.now();
    if let Some(snapshot) = cache.read(now) {
        return Ok(snapshot.into_iter().map(task_from_snapshot).collect());
    }
    let tasks = api.fetch_items()?;
    let snapshot: Vec<ItemSnapshot> = tasks
        .iter()
        .map(|t| ItemSnapshot {
            item_id: t.issue.to_string(),
            issue_number: t.issue,
            state: t.state.as_str().to_string(),
            wave: t.wave,
            worker: t.worker.clone(),
            attempt: t.attempt,
        })
        .collect();
    cache.write(snapshot, now)?;
    Ok(tasks)
}

fn task_from_snapshot(s: ItemSnapshot) -> Task {
    Task {
        issue: s.issue_number,
        wave: s.wave,
        state: TaskState::parse(&s.state).unwrap_or(TaskState::Blocked),
        attempt: s.attempt,
        worker: s.worker,
        prompt: String::new(),
        estimate_sec: None,
        timeout_sec: None,
    }
}

fn worker_loop(worker: &Worker, drain_signal: &DrainSignal, once: bool) {
    loop {
        if drain_signal.is_set() {
            break;
        }
        match worker.run_once() {
            Ok(true) => {}
            Ok(false) => {
                if once {
                    break;
                }
                thread::sleep(poll_interval());
            }
            Err(e) => {
                tracing::warn!(error = %e, "worker tick failed");
                thread::sleep(poll_interval());
            }
        }
        if once {
            break;
        }
    }
}

/// 20-30s jitter between idle polls, per `spec.md` §5.
fn poll_interval() -> Duration {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    Duration::from_secs(20 + (nanos % 10_000_000_000) / 1_000_000_000)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("pid{}", std::process::id()))
}
