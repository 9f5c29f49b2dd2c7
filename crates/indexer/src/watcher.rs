use crate::error::{IndexerError, Result};
use crate::router::{FsEvent, WorkspaceEvent};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Recursive filesystem watcher feeding [`WorkspaceEvent::Fs`] into the router.
///
/// Dropping it stops the notifications.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    pub fn start(
        roots: &[PathBuf],
        sender: mpsc::Sender<WorkspaceEvent>,
        poll_interval: Duration,
    ) -> Result<Self> {
        if let Some(missing) = roots.iter().find(|root| !root.is_dir()) {
            return Err(IndexerError::InvalidPath(missing.display().to_string()));
        }
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for fs_event in translate(event) {
                        if sender.blocking_send(WorkspaceEvent::Fs(fs_event)).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => log::warn!("Watcher error: {err}"),
            },
            NotifyConfig::default().with_poll_interval(poll_interval),
        )?;
        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive).map_err(|e| {
                IndexerError::Other(format!("failed to watch {}: {e}", root.display()))
            })?;
        }
        log::info!("Watching {} workspace roots", roots.len());
        Ok(Self { _watcher: watcher })
    }
}

/// Maps one notify event onto per-path create/change/delete notifications.
///
/// Renames become delete + create, which is what lets the reconciler pair a
/// removed directory with its new location.
#[must_use]
pub fn translate(event: Event) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FsEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(FsEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.into_iter().map(FsEvent::Deleted).collect(),
            RenameMode::To => event.paths.into_iter().map(FsEvent::Created).collect(),
            RenameMode::Both => {
                let mut paths = event.paths.into_iter();
                let mut out = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    out.push(FsEvent::Deleted(from));
                }
                out.extend(paths.map(FsEvent::Created));
                out
            }
            RenameMode::Any | RenameMode::Other => event
                .paths
                .into_iter()
                .map(|path| {
                    if path.exists() {
                        FsEvent::Created(path)
                    } else {
                        FsEvent::Deleted(path)
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) => event.paths.into_iter().map(FsEvent::Changed).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
