//! # Everywhere Indexer
//!
//! Incrementally maintained file and symbol index for a set of workspace roots.
//!
//! ## Pipeline
//!
//! ```text
//! Workspace events (fs watcher, documents, folders, config)
//!     │
//!     ├──> EventRouter (filter, delay, debounce)
//!     │      └─> Update / Remove / Rebuild intents
//!     │
//!     ├──> MutationQueue (one worker, strict FIFO)
//!     │      ├─> PathReconciler (targeted fetch + merge, directory renames)
//!     │      └─> IndexBuilder (full fetch, atomic replace)
//!     │
//!     └──> IndexStore
//!            └─> Immutable snapshots for readers
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use everywhere_indexer::{
//!     EntryConverter, FsDataFetcher, IndexConfig, WorkspaceIndex, WorkspaceOptions,
//! };
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (_config_tx, config_rx) = watch::channel(IndexConfig::default());
//!     let index = WorkspaceIndex::start(
//!         Arc::new(FsDataFetcher::new()),
//!         Arc::new(EntryConverter::new()),
//!         config_rx,
//!         WorkspaceOptions::new(["/path/to/project".into()]),
//!     );
//!     index.index("startup").await?;
//!
//!     let count = index.get_data().map_or(0, |entries| entries.len());
//!     println!("Indexed {count} entries");
//!     Ok(())
//! }
//! ```

mod builder;
mod config;
mod converter;
mod entry;
mod error;
mod events;
mod fetcher;
mod intent;
mod progress;
mod queue;
mod reconciler;
mod router;
mod source;
mod stats;
mod store;
mod watcher;
mod workspace;

pub use builder::{IndexBuilder, DEFAULT_PROGRESS_SETTLE};
pub use config::{ConfigImpact, ConfigSource, ExcludeMode, IndexConfig, ItemsFilter, PathFilter};
pub use converter::{Converter, EntryConverter};
pub use entry::{EntryKind, IndexEntry, RawRecord, SourceRange, SymbolKind};
pub use error::{IndexerError, Result};
pub use events::IndexEvent;
pub use fetcher::{DataFetcher, FetchRequest, FsDataFetcher};
pub use intent::{Intent, IntentKind, IntentOutcome, IntentTicket};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use queue::{IntentExecutor, MutationQueue, QueueHandle, QueueHealth};
pub use reconciler::{
    PathReconciler, Reconciliation, ReconcilerState, RenameContext, DEFAULT_RENAME_WINDOW,
};
pub use router::{EventRouter, FsEvent, RouterTimings, WorkspaceEvent};
pub use source::{EntrySource, LoadedEntries};
pub use stats::RebuildStats;
pub use store::{IndexSnapshot, IndexStore, SnapshotReader};
pub use watcher::{translate as translate_fs_event, FsWatcher, DEFAULT_POLL_INTERVAL};
pub use workspace::{WorkspaceIndex, WorkspaceOptions, RECOVERY_REBUILD_ORIGIN};
