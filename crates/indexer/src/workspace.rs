use crate::builder::{IndexBuilder, DEFAULT_PROGRESS_SETTLE};
use crate::config::IndexConfig;
use crate::converter::Converter;
use crate::entry::IndexEntry;
use crate::error::{IndexerError, Result};
use crate::events::IndexEvent;
use crate::fetcher::DataFetcher;
use crate::intent::{Intent, IntentKind, IntentTicket};
use crate::progress::ProgressReporter;
use crate::queue::{IntentExecutor, MutationQueue, QueueHandle, QueueHealth};
use crate::reconciler::{PathReconciler, DEFAULT_RENAME_WINDOW};
use crate::router::{EventRouter, RouterTimings, WorkspaceEvent};
use crate::source::EntrySource;
use crate::store::{IndexStore, SnapshotReader};
use crate::watcher::FsWatcher;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

const EVENT_BROADCAST_CAPACITY: usize = 1024;

/// Origin recorded on the rebuild scheduled after a failed update.
pub const RECOVERY_REBUILD_ORIGIN: &str = "on error catch";

#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub roots: Vec<PathBuf>,
    pub timings: RouterTimings,
    pub rename_window: Duration,
    pub progress_settle: Duration,
}

impl WorkspaceOptions {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            timings: RouterTimings::default(),
            rename_window: DEFAULT_RENAME_WINDOW,
            progress_settle: DEFAULT_PROGRESS_SETTLE,
        }
    }
}

type RebuildSlot = Arc<Mutex<Option<CancellationToken>>>;

fn lock_slot(slot: &RebuildSlot) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live, incrementally maintained index of a set of workspace roots.
///
/// Cloning is cheap; the background tasks stop when the last clone is dropped
/// or [`WorkspaceIndex::shutdown`] is called.
#[derive(Clone)]
pub struct WorkspaceIndex {
    inner: Arc<WorkspaceInner>,
}

struct WorkspaceInner {
    queue: QueueHandle,
    reader: SnapshotReader,
    events: broadcast::Sender<IndexEvent>,
    router_tx: mpsc::Sender<WorkspaceEvent>,
    roots: watch::Receiver<Vec<PathBuf>>,
    rebuild_slot: RebuildSlot,
    shutdown: CancellationToken,
}

impl Drop for WorkspaceInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl WorkspaceIndex {
    /// Spawns the mutation queue worker and the event router.
    ///
    /// Nothing is indexed until [`WorkspaceIndex::index`] is called or an event
    /// produces an intent.
    pub fn start(
        fetcher: Arc<dyn DataFetcher>,
        converter: Arc<dyn Converter>,
        config: watch::Receiver<IndexConfig>,
        options: WorkspaceOptions,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let mut roots = options.roots;
        roots.sort();
        roots.dedup();
        let (roots_tx, roots_rx) = watch::channel(roots);

        let store = IndexStore::new();
        let reader = store.reader();
        let rebuild_slot = RebuildSlot::default();
        let worker = IndexWorker {
            store,
            reconciler: PathReconciler::new(options.rename_window),
            builder: IndexBuilder::new(options.progress_settle),
            source: EntrySource::new(fetcher, converter, config.clone(), roots_rx.clone()),
            events: events.clone(),
            progress: ProgressReporter::new(events.clone()),
            rebuild_slot: Arc::clone(&rebuild_slot),
            shutdown: shutdown.clone(),
        };
        let queue = MutationQueue::spawn(worker, events.clone(), shutdown.clone());

        let router_tx = EventRouter::new(
            queue.clone(),
            reader.clone(),
            events.clone(),
            config,
            roots_tx,
            options.timings,
        )
        .spawn(shutdown.clone());

        Self {
            inner: Arc::new(WorkspaceInner {
                queue,
                reader,
                events,
                router_tx,
                roots: roots_rx,
                rebuild_slot,
                shutdown,
            }),
        }
    }

    /// Enqueues a full rebuild and waits until it has run.
    pub async fn index(&self, reason: impl Into<String>) -> Result<()> {
        self.request_index(reason)?.completed().await
    }

    /// Enqueues a full rebuild without waiting for it.
    pub fn request_index(&self, reason: impl Into<String>) -> Result<IntentTicket> {
        self.enqueue(Intent::rebuild(reason))
    }

    pub fn enqueue(&self, intent: Intent) -> Result<IntentTicket> {
        self.inner.queue.enqueue(intent)
    }

    /// Current entries; `None` until the index has been built once.
    #[must_use]
    pub fn get_data(&self) -> Option<Arc<[IndexEntry]>> {
        self.inner.reader.get_data()
    }

    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        self.inner.reader.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn health(&self) -> QueueHealth {
        self.inner.queue.health()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<QueueHealth> {
        self.inner.queue.health_stream()
    }

    /// Sender feeding the event router.
    #[must_use]
    pub fn events(&self) -> mpsc::Sender<WorkspaceEvent> {
        self.inner.router_tx.clone()
    }

    pub async fn notify(&self, event: WorkspaceEvent) -> Result<()> {
        self.inner
            .router_tx
            .send(event)
            .await
            .map_err(|_| IndexerError::QueueClosed)
    }

    #[must_use]
    pub fn roots(&self) -> Vec<PathBuf> {
        self.inner.roots.borrow().clone()
    }

    /// Starts a filesystem watcher over the current roots.
    pub fn watch_filesystem(&self, poll_interval: Duration) -> Result<FsWatcher> {
        FsWatcher::start(&self.roots(), self.events(), poll_interval)
    }

    /// Cancels the rebuild that is currently running, if any.
    ///
    /// Queued intents are untouched; the previous snapshot stays installed.
    pub fn cancel_rebuild(&self) -> bool {
        match lock_slot(&self.inner.rebuild_slot).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn evict_pending(&self) {
        self.inner.queue.evict_pending();
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

/// Queue worker state; the only owner of the store.
struct IndexWorker {
    store: IndexStore,
    reconciler: PathReconciler,
    builder: IndexBuilder,
    source: EntrySource,
    events: broadcast::Sender<IndexEvent>,
    progress: ProgressReporter,
    rebuild_slot: RebuildSlot,
    shutdown: CancellationToken,
}

impl IndexWorker {
    async fn rebuild(&mut self, reason: &str) -> Result<()> {
        let cancel = self.shutdown.child_token();
        *lock_slot(&self.rebuild_slot) = Some(cancel.clone());
        let result = self
            .builder
            .rebuild(
                &self.store,
                &self.source,
                &cancel,
                &mut self.progress,
                reason,
            )
            .await;
        lock_slot(&self.rebuild_slot).take();

        let stats = result?;
        self.reconciler.reset();
        let _ = self.events.send(IndexEvent::Rebuilt(stats));
        Ok(())
    }

    async fn update(&mut self, uri: &Path, queue: &QueueHandle) -> Result<()> {
        let cancel = self.shutdown.child_token();
        match self
            .reconciler
            .update(&self.store, &self.source, uri, &cancel)
            .await
        {
            Ok(outcome) => {
                log::debug!("Reconciled {}: {outcome:?}", uri.display());
                Ok(())
            }
            Err(err) => {
                self.reconciler.reset();
                if !matches!(err, IndexerError::Cancelled) {
                    log::warn!(
                        "Update of {} failed, scheduling a rebuild: {err}",
                        uri.display()
                    );
                    queue.enqueue(Intent::rebuild(RECOVERY_REBUILD_ORIGIN))?;
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl IntentExecutor for IndexWorker {
    async fn execute(&mut self, intent: &Intent, queue: &QueueHandle) -> Result<()> {
        match &intent.kind {
            IntentKind::Rebuild => self.rebuild(&intent.origin).await,
            IntentKind::Update(uri) => self.update(uri, queue).await,
            IntentKind::Remove(uri) => {
                let outcome = self.reconciler.remove(&self.store, uri);
                log::debug!("Reconciled removal of {}: {outcome:?}", uri.display());
                Ok(())
            }
        }
    }
}
