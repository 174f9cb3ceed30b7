//! Environment-knob resolution.
//!
//! | Field                 | Env var                    | Default |
//! |------------------------|----------------------------|---------|
//! | `slaps_dir`            | `SLAPS_DIR`                | `.slaps` |
//! | `wave`                 | `TASK_WAVE`                | `1` |
//! | `workers`              | `SLAPS_WORKERS`            | number of CPUs |
//! | `refresh_interval_sec` | `SLAPS_REFRESH_SEC`        | `60` |
//! | `blockers_ttl_sec`     | `SLAPS_BLOCKERS_TTL`       | `300` |
//! | `cache_hit_warn`       | `SLAPS_CACHE_HIT_WARN`     | `0.7` |
//! | `reconcile_sec`        | `SLAPS_RECONCILE_SEC`      | `2` |
//! | `reconcile_max`        | `SLAPS_RECONCILE_MAX`      | `0` (unbounded) |
//! | `progress_min_sec`     | `SLAPS_PROGRESS_MIN_SEC`   | `30` |
//! | `wave_status_issue`    | `WAVE_STATUS_ISSUE`        | none |
//! | `leader_ttl_sec`       | `SLAPS_LEADER_TTL_SEC`     | `15` |
//! | `lease_ttl_sec`        | `SLAPS_LEASE_TTL_SEC`      | `1800` |
//! | `backend`              | `SLAPS_BACKEND`            | `fs` |
//! | `gh_owner`             | `SLAPS_GH_OWNER`           | none |
//! | `gh_project`           | `SLAPS_GH_PROJECT`         | none |
//! | `gh_repo`              | `SLAPS_GH_REPO`            | none |
//!
//! Resolution order is env var, then a `.slaps/config` file of `key=value`
//! lines, then the hard default. `load_with_env` takes an injectable
//! `get_env` closure so tests never touch real process environment.

use std::path::{Path, PathBuf};

/// Which `QueueStore` implementation a binary wires up. `spec.md` names two
/// interchangeable backends; an operator picks one per deployment via
/// `SLAPS_BACKEND` (or the `backend=` config key), never both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Fs,
    Fields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub slaps_dir: PathBuf,
    pub wave: u32,
    pub workers: usize,
    pub refresh_interval_sec: u64,
    pub blockers_ttl_sec: u64,
    pub cache_hit_warn: f64,
    pub reconcile_sec: u64,
    pub reconcile_max: u64,
    pub progress_min_sec: u64,
    pub wave_status_issue: Option<u64>,
    pub leader_ttl_sec: u64,
    pub lease_ttl_sec: u64,
    pub backend: Backend,
    pub gh_owner: Option<String>,
    pub gh_project: Option<u32>,
    pub gh_repo: Option<String>,
}

impl Config {
    pub fn defaults() -> Self {
        Config {
            slaps_dir: PathBuf::from(".slaps"),
            wave: 1,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            refresh_interval_sec: 60,
            blockers_ttl_sec: 300,
            cache_hit_warn: 0.7,
            reconcile_sec: 2,
            reconcile_max: 0,
            progress_min_sec: 30,
            wave_status_issue: None,
            leader_ttl_sec: 15,
            lease_ttl_sec: 1800,
            backend: Backend::Fs,
            gh_owner: None,
            gh_project: None,
            gh_repo: None,
        }
    }

    pub fn load() -> Self {
        Self::load_with_env(Path::new(".slaps"), |k| std::env::var(k).ok())
    }

    pub fn load_with_env(dir_hint: &Path, get_env: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::defaults();

        if let Some(dir) = get_env("SLAPS_DIR") {
            cfg.slaps_dir = PathBuf::from(dir);
        } else {
            cfg.slaps_dir = dir_hint.to_path_buf();
        }

        let config_file = cfg.slaps_dir.join("config");
        if let Ok(contents) = std::fs::read_to_string(&config_file) {
            for (key, value) in parse_config_file(&contents) {
                apply_entry(&mut cfg, &key, &value);
            }
        }

        for (env_key, field) in [
            ("TASK_WAVE", "wave"),
            ("SLAPS_WORKERS", "workers"),
            ("SLAPS_REFRESH_SEC", "refresh_interval_sec"),
            ("SLAPS_BLOCKERS_TTL", "blockers_ttl_sec"),
            ("SLAPS_CACHE_HIT_WARN", "cache_hit_warn"),
            ("SLAPS_RECONCILE_SEC", "reconcile_sec"),
            ("SLAPS_RECONCILE_MAX", "reconcile_max"),
            ("SLAPS_PROGRESS_MIN_SEC", "progress_min_sec"),
            ("WAVE_STATUS_ISSUE", "wave_status_issue"),
            ("SLAPS_LEADER_TTL_SEC", "leader_ttl_sec"),
            ("SLAPS_LEASE_TTL_SEC", "lease_ttl_sec"),
            ("SLAPS_BACKEND", "backend"),
            ("SLAPS_GH_OWNER", "gh_owner"),
            ("SLAPS_GH_PROJECT", "gh_project"),
            ("SLAPS_GH_REPO", "gh_repo"),
        ] {
            if let Some(v) = get_env(env_key) {
                apply_entry(&mut cfg, field, &v);
            }
        }

        cfg
    }
}

fn apply_entry(cfg: &mut Config, key: &str, value: &str) {
    match key {
        "wave" => {
            if let Ok(n) = value.parse() {
                cfg.wave = n;
            }
        }
        "workers" => {
            if let Ok(n) = value.parse::<usize>() {
                if n > 0 {
                    cfg.workers = n;
                }
            }
        }
        "refresh_interval_sec" => {
            if let Ok(n) = value.parse() {
                cfg.refresh_interval_sec = n;
            }
        }
        "blockers_ttl_sec" => {
            if let Ok(n) = value.parse() {
                cfg.blockers_ttl_sec = n;
            }
        }
        "cache_hit_warn" => {
            if let Ok(n) = value.parse() {
                cfg.cache_hit_warn = n;
            }
        }
        "reconcile_sec" => {
            if let Ok(n) = value.parse() {
                cfg.reconcile_sec = n;
            }
        }
        "reconcile_max" => {
            if let Ok(n) = value.parse() {
                cfg.reconcile_max = n;
            }
        }
        "progress_min_sec" => {
            if let Ok(n) = value.parse() {
                cfg.progress_min_sec = n;
            }
        }
        "wave_status_issue" => {
            if let Ok(n) = value.parse() {
                cfg.wave_status_issue = Some(n);
            }
        }
        "leader_ttl_sec" => {
            if let Ok(n) = value.parse() {
                cfg.leader_ttl_sec = n;
            }
        }
        "lease_ttl_sec" => {
            if let Ok(n) = value.parse() {
                cfg.lease_ttl_sec = n;
            }
        }
        "backend" => match value.to_ascii_lowercase().as_str() {
            "fs" | "filesystem" => cfg.backend = Backend::Fs,
            "fields" | "server-fields" | "github" => cfg.backend = Backend::Fields,
            _ => {}
        },
        "gh_owner" => cfg.gh_owner = Some(value.to_string()),
        "gh_project" => {
            if let Ok(n) = value.parse() {
                cfg.gh_project = Some(n);
            }
        }
        "gh_repo" => cfg.gh_repo = Some(value.to_string()),
        _ => {}
    }
}

/// Parses `key=value` lines, skipping blank lines and `#` comments.
fn parse_config_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (k, v) = line.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}
