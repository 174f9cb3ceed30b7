//! C2: the dependency index.
//!
//! Ingests blocker/dependent edges from three optional sources: an edges
//! CSV, per-issue raw records carrying a `blockedBy` list, and (lazily, with
//! a TTL) the server's own `blockedBy` field. Edge ingestion is idempotent
//! and case-insensitive on the `blockedBy` key; a missing key means "no
//! blockers".

use std::collections::{HashMap, HashSet};

use crate::domain::DependencyEdge;

/// Header tokens naming the blocker column.
const BLOCKER_TOKENS: [&str; 4] = ["from", "src", "blocker", "prereq"];
/// Header tokens naming the dependent (blocked) column.
const DEPENDENT_TOKENS: [&str; 4] = ["to", "dst", "blocked", "dependent"];

#[derive(Debug, Default)]
pub struct DependencyIndex {
    /// dependent -> blockers
    blockers_of: HashMap<u64, HashSet<u64>>,
    /// blocker -> dependents
    dependents_of: HashMap<u64, HashSet<u64>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, blocker: u64, dependent: u64) {
        self.blockers_of.entry(dependent).or_default().insert(blocker);
        self.dependents_of.entry(blocker).or_default().insert(dependent);
    }

    pub fn add_edges(&mut self, edges: impl IntoIterator<Item = DependencyEdge>) {
        for e in edges {
            self.add_edge(e.blocker, e.dependent);
        }
    }

    /// Sets the full blocker list for `dependent`, from a `blockedBy` record.
    /// Idempotent: replaces any prior set for this dependent.
    pub fn set_blocked_by(&mut self, dependent: u64, blockers: impl IntoIterator<Item = u64>) {
        let blockers: HashSet<u64> = blockers.into_iter().collect();
        if let Some(old) = self.blockers_of.remove(&dependent) {
            for b in old {
                if let Some(set) = self.dependents_of.get_mut(&b) {
                    set.remove(&dependent);
                }
            }
        }
        for &b in &blockers {
            self.dependents_of.entry(b).or_default().insert(dependent);
        }
        self.blockers_of.insert(dependent, blockers);
    }

    pub fn blockers_of(&self, dependent: u64) -> Vec<u64> {
        self.blockers_of
            .get(&dependent)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, blocker: u64) -> Vec<u64> {
        self.dependents_of
            .get(&blocker)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `true` if `dependent` has no blockers, or every blocker is in
    /// `closed`.
    pub fn is_satisfied(&self, dependent: u64, closed: &HashSet<u64>) -> bool {
        match self.blockers_of.get(&dependent) {
            None => true,
            Some(blockers) => blockers.iter().all(|b| closed.contains(b)),
        }
    }

    /// Parses a CSV edges file. Accepts an optional header row (recognized
    /// tokens are case-insensitive) or headerless two-column rows. When a
    /// header is present, its recognized tokens determine which column
    /// holds the blocker and which holds the dependent, rather than
    /// assuming the blocker always comes first — a `dependent,blocker`
    /// header is read correctly, not just `blocker,dependent`. Comment
    /// (`#`) and blank lines are skipped. Malformed rows are skipped, not
    /// fatal.
    pub fn parse_edges_csv(contents: &str) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        let mut lines = contents.lines().peekable();

        // Headerless default: column 0 is the blocker, column 1 the dependent.
        let mut blocker_col = 0usize;
        let mut dependent_col = 1usize;

        if let Some(first) = lines.peek() {
            let cols: Vec<String> = first
                .split(',')
                .map(|c| c.trim().to_ascii_lowercase())
                .collect();
            let is_header = cols
                .iter()
                .any(|c| BLOCKER_TOKENS.contains(&c.as_str()) || DEPENDENT_TOKENS.contains(&c.as_str()));
            if is_header {
                if let Some(idx) = cols.iter().position(|c| BLOCKER_TOKENS.contains(&c.as_str())) {
                    blocker_col = idx;
                }
                if let Some(idx) = cols.iter().position(|c| DEPENDENT_TOKENS.contains(&c.as_str())) {
                    dependent_col = idx;
                }
                lines.next();
            }
        }

        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = line.split(',').collect();
            let (Some(a), Some(b)) = (cols.get(blocker_col), cols.get(dependent_col)) else {
                continue;
            };
            let (Ok(blocker), Ok(dependent)) =
                (a.trim().parse::<u64>(), b.trim().parse::<u64>())
            else {
                continue;
            };
            edges.push(DependencyEdge { blocker, dependent });
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfied_with_no_blockers() {
        let idx = DependencyIndex::new();
        assert!(idx.is_satisfied(1, &HashSet::new()));
    }

    #[test]
    fn satisfied_when_all_blockers_closed() {
        let mut idx = DependencyIndex::new();
        idx.add_edge(1, 2);
        idx.add_edge(3, 2);
        let mut closed = HashSet::new();
        closed.insert(1);
        assert!(!idx.is_satisfied(2, &closed));
        closed.insert(3);
        assert!(idx.is_satisfied(2, &closed));
    }

    #[test]
    fn dependents_of_returns_all_blocked_tasks() {
        let mut idx = DependencyIndex::new();
        idx.add_edge(1, 2);
        idx.add_edge(1, 3);
        let mut deps = idx.dependents_of(1);
        deps.sort();
        assert_eq!(deps, vec![2, 3]);
    }

    #[test]
    fn set_blocked_by_is_idempotent() {
        let mut idx = DependencyIndex::new();
        idx.set_blocked_by(2, [1, 3]);
        idx.set_blocked_by(2, [1, 3]);
        let mut blockers = idx.blockers_of(2);
        blockers.sort();
        assert_eq!(blockers, vec![1, 3]);
    }

    #[test]
    fn set_blocked_by_replaces_prior_set() {
        let mut idx = DependencyIndex::new();
        idx.set_blocked_by(2, [1]);
        idx.set_blocked_by(2, [5]);
        assert_eq!(idx.blockers_of(2), vec![5]);
        assert!(idx.dependents_of(1).is_empty());
    }

    #[test]
    fn parse_headered_csv() {
        let csv = "blocker,dependent\n1,2\n3,4\n";
        let edges = DependencyIndex::parse_edges_csv(csv);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0], DependencyEdge { blocker: 1, dependent: 2 });
    }

    #[test]
    fn parse_headerless_csv() {
        let csv = "1,2\n3,4\n";
        let edges = DependencyIndex::parse_edges_csv(csv);
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn parse_skips_comments_blanks_and_malformed_rows() {
        let csv = "# comment\n\n1,2\nnotanumber,4\n3\n5,6\n";
        let edges = DependencyIndex::parse_edges_csv(csv);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1], DependencyEdge { blocker: 5, dependent: 6 });
    }

    #[test]
    fn parse_accepts_alternate_header_tokens() {
        let csv = "src,dst\n1,2\n";
        let edges = DependencyIndex::parse_edges_csv(csv);
        assert_eq!(edges, vec![DependencyEdge { blocker: 1, dependent: 2 }]);
    }

    #[test]
    fn parse_resolves_column_order_from_reversed_header() {
        let csv = "dependent,blocker\n2,1\n4,3\n";
        let edges = DependencyIndex::parse_edges_csv(csv);
        assert_eq!(edges, vec![
            DependencyEdge { blocker: 1, dependent: 2 },
            DependencyEdge { blocker: 3, dependent: 4 },
        ]);
    }

    #[test]
    fn cross_wave_blocker_satisfied_by_marker() {
        // A blocker closed in an earlier wave is just another closed id —
        // the index itself is wave-agnostic; the watcher is responsible for
        // treating "closed in any earlier wave" as satisfied.
        let mut idx = DependencyIndex::new();
        idx.add_edge(100, 200);
        let mut closed = HashSet::new();
        closed.insert(100);
        assert!(idx.is_satisfied(200, &closed));
    }
}
