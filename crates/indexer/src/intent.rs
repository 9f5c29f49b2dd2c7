use crate::error::{IndexerError, Result};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentKind {
    Update(PathBuf),
    Remove(PathBuf),
    Rebuild,
}

/// A single pending index mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    /// Assigned by the queue on enqueue; strictly increasing.
    pub id: u64,
    pub kind: IntentKind,
    /// Free-text provenance, diagnostic only.
    pub origin: String,
}

impl Intent {
    pub fn update(uri: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self::new(IntentKind::Update(uri.into()), origin)
    }

    pub fn remove(uri: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self::new(IntentKind::Remove(uri.into()), origin)
    }

    pub fn rebuild(origin: impl Into<String>) -> Self {
        Self::new(IntentKind::Rebuild, origin)
    }

    fn new(kind: IntentKind, origin: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            origin: origin.into(),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IntentKind::Update(uri) => write!(f, "update {} ({})", uri.display(), self.origin),
            IntentKind::Remove(uri) => write!(f, "remove {} ({})", uri.display(), self.origin),
            IntentKind::Rebuild => write!(f, "rebuild ({})", self.origin),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentOutcome {
    Completed,
    Failed(String),
    /// Dropped by an explicit `evict_pending` before it started.
    Evicted,
}

/// Resolves once the queue has finished with the intent.
#[derive(Debug)]
pub struct IntentTicket {
    id: u64,
    rx: oneshot::Receiver<IntentOutcome>,
}

impl IntentTicket {
    pub(crate) const fn new(id: u64, rx: oneshot::Receiver<IntentOutcome>) -> Self {
        Self { id, rx }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub async fn outcome(self) -> Result<IntentOutcome> {
        self.rx.await.map_err(|_| IndexerError::QueueClosed)
    }

    /// Waits for completion and maps a failed intent into an error.
    pub async fn completed(self) -> Result<()> {
        match self.outcome().await? {
            IntentOutcome::Completed => Ok(()),
            IntentOutcome::Failed(reason) => Err(IndexerError::Other(reason)),
            IntentOutcome::Evicted => Err(IndexerError::Cancelled),
        }
    }
}
