mod cli;
mod external;
mod llm;

use std::fs;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use slaps_core::cache::{ItemSnapshot, ItemsCache};
use slaps_core::config::{Backend, Config};
use slaps_core::coordinator::Coordinator;
use slaps_core::depgraph::DependencyIndex;
use slaps_core::domain::{Task, TaskState};
use slaps_core::ghcli::GhCliApi;
use slaps_core::ledger::AttemptLedger;
use slaps_core::leader::LeaderLease;
use slaps_core::ports::{Clock, GitHubApi, SystemClock};
use slaps_core::progress::EventLog;
use slaps_core::queue::fields::FieldsQueueStore;
use slaps_core::queue::fs::FsQueueStore;
use slaps_core::queue::QueueStore;
use slaps_core::watcher::{ClosedMarkers, Watcher};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(code) => {
            if code == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(code as u8)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "slaps exited with an error");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<i32> {
    let args = cli::Cli::parse();
    let cfg = Config::load();
    let wave_start = args.wave_start.unwrap_or(cfg.wave);

    fs::create_dir_all(&cfg.slaps_dir)?;
    let events = Arc::new(EventLog::open(cfg.slaps_dir.join("logs"))?);
    let ledger = Arc::new(AttemptLedger::new(&cfg.slaps_dir)?);
    let llm = Arc::new(llm::ProcessLlmRunner::new("claude"));
    let mut depgraph = DependencyIndex::new();

    let (queue, max_wave): (Arc<dyn QueueStore>, u32) = match cfg.backend {
        Backend::Fs => {
            let queue = Arc::new(FsQueueStore::new(&cfg.slaps_dir)?);
            if let Ok(csv) = fs::read_to_string(cfg.slaps_dir.join("admin").join("edges.csv")) {
                depgraph.add_edges(DependencyIndex::parse_edges_csv(&csv));
            }
            let max_wave = discover_max_wave(&cfg.slaps_dir).unwrap_or(wave_start);
            (queue, max_wave)
        }
        Backend::Fields => {
            let candidate_id = format!("slaps-coordinator-{}", std::process::id());
            let lease = LeaderLease::new(&cfg.slaps_dir, cfg.leader_ttl_sec);
            let clock = SystemClock;
            if !lease.try_become_leader(&candidate_id, &clock)? {
                tracing::info!("another coordinator instance already holds the leader lease; standing down");
                return Ok(0);
            }

            let (api, tasks) = fetch_fields_snapshot(&cfg)?;
            let max_wave = tasks.iter().map(|t| t.wave).max().unwrap_or(wave_start);

            for task in &tasks {
                if let Ok(blockers) = api.fetch_blocked_by(task.issue) {
                    depgraph.set_blocked_by(task.issue, blockers);
                }
            }

            let api_dyn: Arc<dyn GitHubApi> = api;
            let queue = Arc::new(FieldsQueueStore::new(
                api_dyn,
                cfg.slaps_dir.join("admin").join("leases"),
            )?);
            queue.sync_from(tasks);
            (queue, max_wave)
        }
    };
    let depgraph = Arc::new(Mutex::new(depgraph));

    let mut watchers = Vec::new();
    for wave in wave_start..=max_wave {
        let markers = ClosedMarkers::new(&cfg.slaps_dir)?;
        let watcher = Watcher::new(
            wave,
            queue.clone(),
            depgraph.clone(),
            ledger.clone(),
            markers,
            llm.clone(),
            events.clone(),
        );
        watchers.push((wave, watcher));
    }

    let preflight = Arc::new(external::CommandPreflight {
        check_cmd: if args.no_commit_preflight {
            None
        } else {
            Some("true".to_string())
        },
    });
    let guardian = Arc::new(external::CommandGuardian {
        cmd: "true".to_string(),
    });
    let pusher = Arc::new(external::GitPusher { enabled: true });

    let coordinator = Coordinator {
        wave_start,
        wave_end: max_wave,
        watchers,
        guardian,
        pusher,
        preflight,
        events,
        tick_interval: Duration::from_secs(cfg.reconcile_sec),
        max_ticks_per_wave: cfg.reconcile_max,
    };

    coordinator.run()
}

/// Builds the `GhCliApi` for `cfg`'s server-fields backend and resolves the
/// current item snapshot, preferring the on-disk cache when it is still
/// within `refresh_interval_sec` and falling back to a live `gh` read on a
/// miss. Returns the adapter too, since the depgraph population that
/// follows still needs per-issue `blockedBy` reads through it.
fn fetch_fields_snapshot(cfg: &Config) -> Result<(Arc<GhCliApi>, Vec<Task>)> {
    let owner = cfg
        .gh_owner
        .clone()
        .ok_or_else(|| anyhow!("SLAPS_GH_OWNER is required when backend=fields"))?;
    let project = cfg
        .gh_project
        .ok_or_else(|| anyhow!("SLAPS_GH_PROJECT is required when backend=fields"))?;
    let api = Arc::new(GhCliApi::new(owner, project, cfg.gh_repo.clone()));

    let cache = ItemsCache::new(&cfg.slaps_dir, cfg.refresh_interval_sec);
    let clock = SystemClock;
    let now = clock.now();
    if let Some(snapshot) = cache.read(now) {
        tracing::debug!("serving fields snapshot from cache");
        let tasks = snapshot
            .into_iter()
            .map(|s| Task {
                issue: s.issue_number,
                wave: s.wave,
                state: TaskState::parse(&s.state).unwrap_or(TaskState::Blocked),
                attempt: s.attempt,
                worker: s.worker,
                prompt: String::new(),
                estimate_sec: None,
                timeout_sec: None,
            })
            .collect();
        return Ok((api, tasks));
    }

    tracing::debug!("fields cache miss; refreshing from gh");
    let tasks = api.fetch_items()?;
    let snapshot = tasks
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
    Ok((api, tasks))
}

fn discover_max_wave(root: &std::path::Path) -> Option<u32> {
    let entries = fs::read_dir(root).ok()?;
    entries
        .flatten()
        .filter_map(|e| {
            e.file_name()
                .to_string_lossy()
                .strip_prefix("wave-")
                .and_then(|s| s.parse::<u32>().ok())
        })
        .max()
}
