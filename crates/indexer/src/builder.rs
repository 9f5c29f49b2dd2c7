use crate::error::{IndexerError, Result};
use crate::progress::ProgressReporter;
use crate::source::EntrySource;
use crate::stats::RebuildStats;
use crate::store::IndexStore;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROGRESS_SETTLE: Duration = Duration::from_millis(250);

/// Full index rebuild.
///
/// The store is only touched once the whole fetch and conversion succeeded:
/// a failed or cancelled rebuild leaves the previous snapshot in place, and a
/// reader never sees the index go empty while a rebuild is running.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    progress_settle: Duration,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_SETTLE)
    }
}

impl IndexBuilder {
    #[must_use]
    pub const fn new(progress_settle: Duration) -> Self {
        Self { progress_settle }
    }

    pub async fn rebuild(
        &self,
        store: &IndexStore,
        source: &EntrySource,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
        reason: &str,
    ) -> Result<RebuildStats> {
        let started = Instant::now();
        progress.reset();
        log::info!("Rebuilding index ({reason})");

        let loaded = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(IndexerError::Cancelled),
            loaded = source.load(None, cancel, progress) => loaded?,
        };
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as u64;
        let stats = RebuildStats::from_entries(&loaded.entries, reason, duration_ms);
        store.replace(loaded.entries, Some(loaded.config_fingerprint));
        log::info!(
            "Index rebuilt in {duration_ms}ms: {} files, {} symbols",
            stats.files,
            stats.symbols
        );

        progress.reset();
        if !self.progress_settle.is_zero() {
            tokio::time::sleep(self.progress_settle).await;
        }
        Ok(stats)
    }
}
