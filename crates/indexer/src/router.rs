use crate::config::{ConfigImpact, IndexConfig, PathFilter};
use crate::events::IndexEvent;
use crate::intent::Intent;
use crate::queue::QueueHandle;
use crate::store::SnapshotReader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Raw filesystem notification for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Changed(PathBuf),
    Created(PathBuf),
    Deleted(PathBuf),
}

impl FsEvent {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Changed(path) | Self::Created(path) | Self::Deleted(path) => path,
        }
    }
}

/// Everything the outside world can tell the index about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    /// The config watch channel has a new value; also picked up without this nudge.
    ConfigChanged,
    FoldersChanged(Vec<PathBuf>),
    DocumentChanged { uri: PathBuf, content_changes: usize },
    Renamed { old_uri: PathBuf, new_uri: PathBuf },
    Fs(FsEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterTimings {
    /// Delay before a created path is indexed.
    pub create_delay: Duration,
    /// Trailing window for debounced document changes.
    pub debounce_window: Duration,
    /// Trailing window for config and folder-set changes.
    pub settings_window: Duration,
}

impl Default for RouterTimings {
    fn default() -> Self {
        Self {
            create_delay: Duration::from_millis(260),
            debounce_window: Duration::from_millis(400),
            settings_window: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CoalesceKey {
    Content(PathBuf),
    Created(PathBuf),
    Config,
    Folders,
}

/// Per-key deadlines; one timer drives all of them.
#[derive(Debug, Default)]
struct Coalescer {
    deadlines: HashMap<CoalesceKey, Instant>,
}

impl Coalescer {
    /// Arms `key`. A trailing key is pushed back on every call, a fixed one keeps
    /// its first deadline. Returns `true` when the key was not armed yet.
    fn schedule(&mut self, key: CoalesceKey, delay: Duration, trailing: bool) -> bool {
        let deadline = Instant::now() + delay;
        match self.deadlines.get_mut(&key) {
            Some(current) => {
                if trailing {
                    *current = deadline;
                }
                false
            }
            None => {
                self.deadlines.insert(key, deadline);
                true
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns the keys due at `now`, earliest first.
    fn take_due(&mut self, now: Instant) -> Vec<CoalesceKey> {
        let mut due: Vec<(Instant, CoalesceKey)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    fn pending(&self) -> usize {
        self.deadlines.len()
    }
}

/// Turns workspace notifications into queued intents.
pub struct EventRouter {
    queue: QueueHandle,
    reader: SnapshotReader,
    events: broadcast::Sender<IndexEvent>,
    config_rx: watch::Receiver<IndexConfig>,
    roots_tx: watch::Sender<Vec<PathBuf>>,
    timings: RouterTimings,
    config: IndexConfig,
    filter: PathFilter,
    coalescer: Coalescer,
    pending_roots: Option<Vec<PathBuf>>,
}

impl EventRouter {
    pub fn new(
        queue: QueueHandle,
        reader: SnapshotReader,
        events: broadcast::Sender<IndexEvent>,
        mut config_rx: watch::Receiver<IndexConfig>,
        roots_tx: watch::Sender<Vec<PathBuf>>,
        timings: RouterTimings,
    ) -> Self {
        let config = config_rx.borrow_and_update().clone();
        let filter = config.path_filter().unwrap_or_else(|err| {
            log::warn!("Invalid exclude configuration, filtering disabled: {err}");
            PathFilter::allow_all()
        });
        Self {
            queue,
            reader,
            events,
            config_rx,
            roots_tx,
            timings,
            config,
            filter,
            coalescer: Coalescer::default(),
            pending_roots: None,
        }
    }

    /// Starts routing; the returned sender feeds the router until `shutdown`.
    pub fn spawn(self, shutdown: CancellationToken) -> mpsc::Sender<WorkspaceEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(self.run(rx, shutdown));
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WorkspaceEvent>, shutdown: CancellationToken) {
        let mut config_open = true;

        loop {
            let next_deadline = self.coalescer.next_deadline();

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                changed = self.config_rx.changed(), if config_open => {
                    if changed.is_ok() {
                        self.schedule_config();
                    } else {
                        config_open = false;
                    }
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if next_deadline.is_some() => {
                    self.flush_due();
                }
            }
        }

        if self.coalescer.pending() > 0 {
            log::debug!(
                "Event router stopped with {} coalesced events pending",
                self.coalescer.pending()
            );
        }
    }

    fn handle(&mut self, event: WorkspaceEvent) {
        match event {
            WorkspaceEvent::Fs(fs_event) => {
                if !self.accepts_fs_path(fs_event.path()) {
                    log::trace!("Dropping excluded fs event {fs_event:?}");
                    return;
                }
                match fs_event {
                    FsEvent::Changed(path) => self.enqueue(Intent::update(path, "fs changed")),
                    FsEvent::Created(path) => {
                        self.coalescer.schedule(
                            CoalesceKey::Created(path),
                            self.timings.create_delay,
                            false,
                        );
                    }
                    FsEvent::Deleted(path) => self.enqueue(Intent::remove(path, "fs deleted")),
                }
            }
            WorkspaceEvent::DocumentChanged {
                uri,
                content_changes,
            } => self.document_changed(uri, content_changes),
            WorkspaceEvent::Renamed { old_uri, new_uri } => {
                // With a single root the filesystem watcher already reports both sides.
                if self.roots_tx.borrow().len() > 1 {
                    self.enqueue(Intent::remove(old_uri, "rename"));
                    self.enqueue(Intent::update(new_uri, "rename"));
                } else {
                    log::trace!("Rename {} left to the fs watcher", old_uri.display());
                }
            }
            WorkspaceEvent::FoldersChanged(roots) => {
                self.pending_roots = Some(roots);
                self.coalescer
                    .schedule(CoalesceKey::Folders, self.timings.settings_window, true);
            }
            WorkspaceEvent::ConfigChanged => self.schedule_config(),
        }
    }

    fn document_changed(&mut self, uri: PathBuf, content_changes: usize) {
        if content_changes == 0 || !self.reader.contains_file(&uri) {
            return;
        }
        if !self.config.use_debounce {
            self.enqueue(Intent::update(uri, "document change"));
            return;
        }
        let fresh = self.coalescer.schedule(
            CoalesceKey::Content(uri.clone()),
            self.timings.debounce_window,
            true,
        );
        if fresh {
            let _ = self.events.send(IndexEvent::BurstStarted { uri });
        }
    }

    fn schedule_config(&mut self) {
        self.coalescer
            .schedule(CoalesceKey::Config, self.timings.settings_window, true);
    }

    fn flush_due(&mut self) {
        for key in self.coalescer.take_due(Instant::now()) {
            match key {
                CoalesceKey::Content(uri) => self.enqueue(Intent::update(uri, "document change")),
                CoalesceKey::Created(path) => self.enqueue(Intent::update(path, "fs created")),
                CoalesceKey::Folders => self.apply_folders(),
                CoalesceKey::Config => self.apply_config(),
            }
        }
    }

    fn apply_folders(&mut self) {
        let Some(mut roots) = self.pending_roots.take() else {
            return;
        };
        roots.sort();
        roots.dedup();
        let changed = self.roots_tx.send_if_modified(|current| {
            let mut sorted = current.clone();
            sorted.sort();
            if sorted == roots {
                false
            } else {
                current.clone_from(&roots);
                true
            }
        });
        if changed {
            log::info!("Workspace folders changed ({} roots)", roots.len());
            self.enqueue(Intent::rebuild("workspace folders changed"));
        }
    }

    fn apply_config(&mut self) {
        let current = self.config_rx.borrow_and_update().clone();
        match ConfigImpact::classify(&self.config, &current) {
            ConfigImpact::Reindex => {
                let fingerprint = current.scope_fingerprint();
                if self.reader.config_fingerprint().as_deref() == Some(fingerprint.as_str()) {
                    log::debug!("Config scope matches the installed index; no rebuild");
                } else {
                    let _ = self.events.send(IndexEvent::WillReindexOnConfigChange);
                    self.enqueue(Intent::rebuild("config changed"));
                }
            }
            ConfigImpact::DebounceToggled => {
                let _ = self.events.send(IndexEvent::DebounceToggled {
                    enabled: current.use_debounce,
                });
            }
            ConfigImpact::Unchanged => {}
        }

        match current.path_filter() {
            Ok(filter) => self.filter = filter,
            Err(err) => log::warn!("Keeping previous path filter: {err}"),
        }
        self.config = current;
    }

    fn accepts_fs_path(&self, path: &Path) -> bool {
        let roots = self.roots_tx.borrow();
        roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.as_os_str().len())
            .is_some_and(|root| self.filter.allows_event_path(root, path))
    }

    fn enqueue(&self, intent: Intent) {
        if let Err(err) = self.queue.enqueue(intent) {
            log::warn!("Dropping routed intent: {err}");
        }
    }
}
