use crate::error::{IndexerError, Result};
use crate::events::IndexEvent;
use crate::intent::{Intent, IntentOutcome, IntentTicket};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Runs intents one at a time on behalf of the queue worker.
#[async_trait]
pub trait IntentExecutor: Send + 'static {
    /// `queue` lets a payload schedule follow-up work (e.g. a recovery rebuild);
    /// anything enqueued runs after the current intent.
    async fn execute(&mut self, intent: &Intent, queue: &QueueHandle) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub pending: usize,
    pub processing: bool,
    pub last_success: Option<SystemTime>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_duration_ms: Option<u64>,
    pub executed: u64,
}

impl QueueHealth {
    const fn initial() -> Self {
        Self {
            pending: 0,
            processing: false,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            last_duration_ms: None,
            executed: 0,
        }
    }
}

struct Envelope {
    intent: Intent,
    reply: oneshot::Sender<IntentOutcome>,
}

struct QueueShared {
    next_id: AtomicU64,
    pending: AtomicUsize,
    evict_below: AtomicU64,
    // Keeps id assignment and channel order identical across concurrent callers.
    send_lock: Mutex<()>,
    health_tx: watch::Sender<QueueHealth>,
}

/// Cheap, clonable entry point into the mutation queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    shared: Arc<QueueShared>,
}

impl QueueHandle {
    /// Appends `intent` and returns immediately.
    pub fn enqueue(&self, mut intent: Intent) -> Result<IntentTicket> {
        let (reply, rx) = oneshot::channel();
        let id = {
            let _guard = self
                .shared
                .send_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
            intent.id = id;
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
            if self.tx.send(Envelope { intent, reply }).is_err() {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(IndexerError::QueueClosed);
            }
            id
        };
        self.publish_pending();
        Ok(IntentTicket::new(id, rx))
    }

    /// Drops every intent enqueued so far that has not started yet.
    ///
    /// The queue never does this on its own, not even for a Rebuild.
    pub fn evict_pending(&self) {
        let cutoff = self.shared.next_id.load(Ordering::SeqCst);
        self.shared.evict_below.fetch_max(cutoff, Ordering::SeqCst);
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn health(&self) -> QueueHealth {
        self.shared.health_tx.borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<QueueHealth> {
        self.shared.health_tx.subscribe()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn publish_pending(&self) {
        let pending = self.pending();
        self.shared
            .health_tx
            .send_modify(|health| health.pending = pending);
    }

    /// Marks one intent finished; returns `true` when nothing is left.
    fn finish_one(&self) -> bool {
        let left = self.shared.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        self.publish_pending();
        left == 0
    }

    fn is_evicted(&self, id: u64) -> bool {
        id < self.shared.evict_below.load(Ordering::SeqCst)
    }
}

/// FIFO of index mutations drained by a single worker task.
pub struct MutationQueue;

impl MutationQueue {
    /// Spawns the worker that owns `executor` and returns the queue handle.
    pub fn spawn<E: IntentExecutor>(
        executor: E,
        events: broadcast::Sender<IndexEvent>,
        shutdown: CancellationToken,
    ) -> QueueHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (health_tx, _) = watch::channel(QueueHealth::initial());
        let handle = QueueHandle {
            tx,
            shared: Arc::new(QueueShared {
                next_id: AtomicU64::new(1),
                pending: AtomicUsize::new(0),
                evict_below: AtomicU64::new(0),
                send_lock: Mutex::new(()),
                health_tx,
            }),
        };
        tokio::spawn(run_worker(executor, rx, handle.clone(), events, shutdown));
        handle
    }
}

async fn run_worker<E: IntentExecutor>(
    mut executor: E,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    handle: QueueHandle,
    events: broadcast::Sender<IndexEvent>,
    shutdown: CancellationToken,
) {
    let mut idle = true;

    loop {
        let envelope = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let Envelope { intent, reply } = envelope;

        if handle.is_evicted(intent.id) {
            log::debug!("Evicted queued intent: {intent}");
            let _ = reply.send(IntentOutcome::Evicted);
            if handle.finish_one() && !idle {
                idle = true;
                mark_drained(&handle, &events);
            }
            continue;
        }

        if idle {
            idle = false;
            handle
                .shared
                .health_tx
                .send_modify(|health| health.processing = true);
            let _ = events.send(IndexEvent::WillProcess);
        }
        let _ = events.send(IndexEvent::WillExecute(intent.clone()));

        log::debug!("Executing {intent}");
        let started = Instant::now();
        let result = executor.execute(&intent, &handle).await;
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(()) => {
                handle.shared.health_tx.send_modify(|health| {
                    health.last_success = Some(SystemTime::now());
                    health.last_error = None;
                    health.consecutive_failures = 0;
                    health.last_duration_ms = Some(duration_ms);
                    health.executed += 1;
                });
                IntentOutcome::Completed
            }
            Err(err) => {
                let message = err.to_string();
                if matches!(err, IndexerError::Cancelled) {
                    log::warn!("{intent} cancelled");
                } else {
                    log::error!("{intent} failed: {message}");
                }
                handle.shared.health_tx.send_modify(|health| {
                    health.last_error = Some(message.clone());
                    health.consecutive_failures += 1;
                    health.last_duration_ms = Some(duration_ms);
                    health.executed += 1;
                });
                let _ = events.send(IndexEvent::Diagnostic {
                    origin: intent.origin.clone(),
                    message: message.clone(),
                });
                IntentOutcome::Failed(message)
            }
        };
        let _ = reply.send(outcome);

        if handle.finish_one() {
            idle = true;
            mark_drained(&handle, &events);
        }
    }

    log::debug!("Mutation queue worker stopped");
}

fn mark_drained(handle: &QueueHandle, events: &broadcast::Sender<IndexEvent>) {
    handle
        .shared
        .health_tx
        .send_modify(|health| health.processing = false);
    let _ = events.send(IndexEvent::DidProcess);
}
