use crate::entry::{IndexEntry, SourceRange};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Immutable view of the index published to readers.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    entries: Option<Arc<[IndexEntry]>>,
    config_fingerprint: Option<String>,
    generation: u64,
}

impl IndexSnapshot {
    /// `None` until the first rebuild (or merge) installs data.
    #[must_use]
    pub fn entries(&self) -> Option<Arc<[IndexEntry]>> {
        self.entries.clone()
    }

    #[must_use]
    pub fn config_fingerprint(&self) -> Option<&str> {
        self.config_fingerprint.as_deref()
    }

    /// Bumped on every published mutation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains_file(&self, uri: &Path) -> bool {
        self.entries.as_ref().is_some_and(|entries| {
            entries
                .iter()
                .any(|entry| entry.is_file() && entry.belongs_to(uri))
        })
    }

    /// Distinct uris of tracked entries whose path string starts with `dir`.
    ///
    /// This is a plain string prefix test: `/a/old` also matches `/a/old2/x`.
    #[must_use]
    pub fn uris_under(&self, dir: &Path) -> Vec<PathBuf> {
        let Some(entries) = &self.entries else {
            return Vec::new();
        };
        let prefix = dir.to_string_lossy();
        let mut seen = HashSet::new();
        entries
            .iter()
            .filter(|entry| !entry.is_help && entry.uri != dir)
            .filter(|entry| entry.uri.to_string_lossy().starts_with(prefix.as_ref()))
            .filter(|entry| seen.insert(entry.uri.clone()))
            .map(|entry| entry.uri.clone())
            .collect()
    }
}

/// Read-only handle given to consumers and to the event router.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<IndexSnapshot>,
}

impl SnapshotReader {
    #[must_use]
    pub fn snapshot(&self) -> IndexSnapshot {
        self.rx.borrow().clone()
    }

    #[must_use]
    pub fn get_data(&self) -> Option<Arc<[IndexEntry]>> {
        self.rx.borrow().entries()
    }

    #[must_use]
    pub fn contains_file(&self, uri: &Path) -> bool {
        self.rx.borrow().contains_file(uri)
    }

    #[must_use]
    pub fn config_fingerprint(&self) -> Option<String> {
        self.rx.borrow().config_fingerprint().map(str::to_string)
    }

    /// Waits for the next published snapshot.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Owner of the current index snapshot.
///
/// Only the mutation queue worker holds an `IndexStore`; every mutation builds a
/// complete new snapshot and publishes it in one step, so readers never see a
/// half-applied change.
#[derive(Debug)]
pub struct IndexStore {
    tx: watch::Sender<IndexSnapshot>,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStore {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(IndexSnapshot::default());
        Self { tx }
    }

    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> IndexSnapshot {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn get_data(&self) -> Option<Arc<[IndexEntry]>> {
        self.tx.borrow().entries()
    }

    #[must_use]
    pub fn contains_file(&self, uri: &Path) -> bool {
        self.tx.borrow().contains_file(uri)
    }

    #[must_use]
    pub fn uris_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.tx.borrow().uris_under(dir)
    }

    /// Installs a whole new snapshot built under `config_fingerprint`.
    pub fn replace(&self, entries: Vec<IndexEntry>, config_fingerprint: Option<String>) {
        let entries = unique_entries(entries);
        self.tx.send_modify(|snapshot| {
            snapshot.entries = Some(entries.into());
            snapshot.config_fingerprint = config_fingerprint;
            snapshot.generation += 1;
        });
    }

    /// Drops every entry whose uri is in `uris` and appends `fresh`.
    ///
    /// Returns the number of removed entries.
    pub fn merge(&self, uris: &[PathBuf], fresh: Vec<IndexEntry>) -> usize {
        let replaced: HashSet<&Path> = uris.iter().map(PathBuf::as_path).collect();
        self.rewrite(|entry| !replaced.contains(entry.uri.as_path()), fresh)
    }

    /// Drops every entry whose path string starts with `dir` (see [`IndexSnapshot::uris_under`]).
    pub fn remove_prefix(&self, dir: &Path) -> usize {
        let prefix = dir.to_string_lossy().to_string();
        self.rewrite(
            |entry| entry.is_help || !entry.uri.to_string_lossy().starts_with(&prefix),
            Vec::new(),
        )
    }

    fn rewrite(&self, keep: impl Fn(&IndexEntry) -> bool, fresh: Vec<IndexEntry>) -> usize {
        let current = self.get_data();
        let before = current.as_ref().map_or(0, |entries| entries.len());
        let mut next: Vec<IndexEntry> = current
            .map(|entries| entries.iter().filter(|entry| keep(entry)).cloned().collect())
            .unwrap_or_default();
        let removed = before - next.len();
        next.extend(fresh);
        let next = unique_entries(next);

        self.tx.send_modify(|snapshot| {
            snapshot.entries = Some(next.into());
            snapshot.generation += 1;
        });
        removed
    }
}

type EntryKey = (PathBuf, bool, Option<SourceRange>, String);

fn unique_entries(entries: Vec<IndexEntry>) -> Vec<IndexEntry> {
    let mut seen: HashSet<EntryKey> = HashSet::with_capacity(entries.len());
    entries
        .into_iter()
        .filter(|entry| {
            if entry.is_help {
                return true;
            }
            let key = if entry.is_file() {
                (entry.uri.clone(), true, None, String::new())
            } else {
                (entry.uri.clone(), false, entry.range, entry.label.clone())
            };
            seen.insert(key)
        })
        .collect()
}
