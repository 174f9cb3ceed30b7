//! C7: item and waves cache.
//!
//! The leader writes, workers read. Two caches share one TTL-and-atomic-
//! write discipline: an items snapshot (per project item) and a waves
//! index (`wave -> [issues]`). Writes use the same write-temp-then-rename
//! primitive as the queue store; readers tolerate absence or staleness and
//! fall back to a direct API call on miss.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::queue::fs::atomic_write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub item_id: String,
    pub issue_number: u64,
    pub state: String,
    pub wave: u32,
    pub worker: Option<String>,
    pub attempt: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ItemsCacheFile {
    updated_at: chrono::DateTime<chrono::Utc>,
    items: Vec<ItemSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WavesCacheFile {
    updated_at: chrono::DateTime<chrono::Utc>,
    waves: HashMap<u32, Vec<u64>>,
}

/// Hit/miss counters for the periodic `cache_stats`/`cache_stats_warning`
/// events described in `spec.md` §4.7.
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            1.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

pub struct ItemsCache {
    path: PathBuf,
    refresh_interval_sec: u64,
}

impl ItemsCache {
    pub fn new(root: impl AsRef<Path>, refresh_interval_sec: u64) -> Self {
        ItemsCache {
            path: root.as_ref().join("admin").join("items_cache.json"),
            refresh_interval_sec,
        }
    }

    pub fn write(&self, items: Vec<ItemSnapshot>, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let file = ItemsCacheFile {
            updated_at: now,
            items,
        };
        atomic_write(&self.path, serde_json::to_string(&file)?.as_bytes())
    }

    /// Returns the cached items if present and fresher than the refresh
    /// interval; `None` on miss or staleness, so the caller can fall back
    /// to a direct API call.
    pub fn read(&self, now: chrono::DateTime<chrono::Utc>) -> Option<Vec<ItemSnapshot>> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let file: ItemsCacheFile = serde_json::from_str(&contents).ok()?;
        let age = now.signed_duration_since(file.updated_at);
        if age.num_seconds() >= self.refresh_interval_sec as i64 {
            return None;
        }
        Some(file.items)
    }

    /// Forces staleness to be ignored by returning whatever is on disk,
    /// used right after a mutating pass that should be visible immediately.
    pub fn read_any_age(&self) -> Option<Vec<ItemSnapshot>> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let file: ItemsCacheFile = serde_json::from_str(&contents).ok()?;
        Some(file.items)
    }
}

pub struct WavesCache {
    path: PathBuf,
    ttl_sec: u64,
}

impl WavesCache {
    pub fn new(root: impl AsRef<Path>, ttl_sec: u64) -> Self {
        WavesCache {
            path: root.as_ref().join("admin").join("waves_cache.json"),
            ttl_sec,
        }
    }

    pub fn write(
        &self,
        waves: HashMap<u32, Vec<u64>>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let file = WavesCacheFile {
            updated_at: now,
            waves,
        };
        atomic_write(&self.path, serde_json::to_string(&file)?.as_bytes())
    }

    pub fn read(&self, now: chrono::DateTime<chrono::Utc>) -> Option<HashMap<u32, Vec<u64>>> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let file: WavesCacheFile = serde_json::from_str(&contents).ok()?;
        let age = now.signed_duration_since(file.updated_at);
        if age.num_seconds() >= self.ttl_sec as i64 {
            return None;
        }
        Some(file.waves)
    }
}
