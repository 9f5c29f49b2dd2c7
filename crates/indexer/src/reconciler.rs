use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::source::EntrySource;
use crate::store::IndexStore;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RENAME_WINDOW: Duration = Duration::from_secs(2);

/// Captured while a directory rename is suspected: a Remove hit a path that
/// is not a tracked file but prefixes tracked entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameContext {
    pub old_directory: PathBuf,
    /// Path strings of the captured entries with `old_directory` stripped.
    pub suffixes: Vec<String>,
    pub captured_at: Instant,
}

impl RenameContext {
    /// Re-roots every captured suffix under `new_directory`.
    ///
    /// Plain string concatenation, mirroring the prefix capture: a sibling
    /// sharing the old prefix (`/a/old2/y` for `/a/old`) lands at `/a/new2/y`.
    #[must_use]
    pub fn rebase(&self, new_directory: &Path) -> Vec<PathBuf> {
        let prefix = new_directory.to_string_lossy();
        self.suffixes
            .iter()
            .map(|suffix| PathBuf::from(format!("{prefix}{suffix}")))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    RenamePending(RenameContext),
}

/// What a reconciliation step did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    FileRemoved { uri: PathBuf, removed: usize },
    RenameSuspected { directory: PathBuf, captured: usize },
    FileUpdated { uri: PathBuf, removed: usize, added: usize },
    Created { uri: PathBuf, added: usize },
    RenameResolved { from: PathBuf, to: PathBuf, added: usize },
    Ignored,
}

/// Resolves Update/Remove intents against the current index.
#[derive(Debug)]
pub struct PathReconciler {
    state: ReconcilerState,
    rename_window: Duration,
}

impl Default for PathReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_RENAME_WINDOW)
    }
}

impl PathReconciler {
    #[must_use]
    pub const fn new(rename_window: Duration) -> Self {
        Self {
            state: ReconcilerState::Idle,
            rename_window,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &ReconcilerState {
        &self.state
    }

    /// Drops the rename context, e.g. when a reconciliation is abandoned.
    pub fn reset(&mut self) {
        if let ReconcilerState::RenamePending(ctx) = &self.state {
            log::debug!(
                "Dropping rename context for {}",
                ctx.old_directory.display()
            );
        }
        self.state = ReconcilerState::Idle;
    }

    pub fn remove(&mut self, store: &IndexStore, uri: &Path) -> Reconciliation {
        self.expire_stale();

        if store.contains_file(uri) {
            let removed = store.merge(&[uri.to_path_buf()], Vec::new());
            return Reconciliation::FileRemoved {
                uri: uri.to_path_buf(),
                removed,
            };
        }

        let candidates = store.uris_under(uri);
        if candidates.is_empty() {
            log::debug!("Ignoring remove of untracked path {}", uri.display());
            return Reconciliation::Ignored;
        }

        let prefix = uri.to_string_lossy().to_string();
        let suffixes: Vec<String> = candidates
            .iter()
            .filter_map(|candidate| {
                candidate
                    .to_string_lossy()
                    .strip_prefix(prefix.as_str())
                    .map(str::to_string)
            })
            .collect();
        store.remove_prefix(uri);

        log::info!(
            "Directory {} removed with {} tracked files; awaiting its new location",
            uri.display(),
            suffixes.len()
        );
        let captured = suffixes.len();
        self.state = ReconcilerState::RenamePending(RenameContext {
            old_directory: uri.to_path_buf(),
            suffixes,
            captured_at: Instant::now(),
        });
        Reconciliation::RenameSuspected {
            directory: uri.to_path_buf(),
            captured,
        }
    }

    /// Applies an Update. Nothing is written to the store unless the fetch
    /// succeeds.
    ///
    /// A pending rename context is consumed when `uri` turns out to be the
    /// renamed directory. Otherwise it stays pending until it expires and
    /// `uri` is fetched like any untracked path.
    pub async fn update(
        &mut self,
        store: &IndexStore,
        source: &EntrySource,
        uri: &Path,
        cancel: &CancellationToken,
    ) -> Result<Reconciliation> {
        self.expire_stale();
        let pending = match std::mem::replace(&mut self.state, ReconcilerState::Idle) {
            ReconcilerState::RenamePending(ctx) => Some(ctx),
            ReconcilerState::Idle => None,
        };
        let mut progress = ProgressReporter::silent();

        if store.contains_file(uri) {
            let targets = [uri.to_path_buf()];
            let loaded = source.load(Some(&targets), cancel, &mut progress).await?;
            let added = loaded.entries.len();
            let removed = store.merge(&targets, loaded.entries);
            return Ok(Reconciliation::FileUpdated {
                uri: uri.to_path_buf(),
                removed,
                added,
            });
        }

        if let Some(ctx) = pending {
            let targets = ctx.rebase(uri);
            let loaded = source.load(Some(&targets), cancel, &mut progress).await?;
            if loaded.entries.is_empty() {
                // Not the renamed directory: keep waiting for it and treat
                // `uri` as an ordinary new path.
                log::debug!(
                    "{} holds none of the files of {}",
                    uri.display(),
                    ctx.old_directory.display()
                );
                self.state = ReconcilerState::RenamePending(ctx);
            } else {
                let added = loaded.entries.len();
                store.merge(&targets, loaded.entries);
                log::info!(
                    "Directory rename {} -> {} reconciled ({} entries)",
                    ctx.old_directory.display(),
                    uri.display(),
                    added
                );
                return Ok(Reconciliation::RenameResolved {
                    from: ctx.old_directory,
                    to: uri.to_path_buf(),
                    added,
                });
            }
        }

        let loaded = source
            .load(Some(&[uri.to_path_buf()]), cancel, &mut progress)
            .await?;
        if loaded.entries.is_empty() {
            return Ok(Reconciliation::Ignored);
        }
        let mut seen = HashSet::new();
        let fetched: Vec<PathBuf> = loaded
            .entries
            .iter()
            .filter(|entry| seen.insert(entry.uri.clone()))
            .map(|entry| entry.uri.clone())
            .collect();
        let added = loaded.entries.len();
        store.merge(&fetched, loaded.entries);
        Ok(Reconciliation::Created {
            uri: uri.to_path_buf(),
            added,
        })
    }

    fn expire_stale(&mut self) {
        if let ReconcilerState::RenamePending(ctx) = &self.state {
            if ctx.captured_at.elapsed() > self.rename_window {
                log::debug!(
                    "Rename context for {} expired",
                    ctx.old_directory.display()
                );
                self.state = ReconcilerState::Idle;
            }
        }
    }
}
