use crate::config::IndexConfig;
use crate::converter::Converter;
use crate::entry::IndexEntry;
use crate::error::Result;
use crate::fetcher::{DataFetcher, FetchRequest};
use crate::progress::ProgressReporter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Entries produced by one fetch + convert pass.
#[derive(Debug)]
pub struct LoadedEntries {
    pub entries: Vec<IndexEntry>,
    /// Scope fingerprint of the config the entries were loaded under.
    pub config_fingerprint: String,
}

/// Fetcher and converter bound to the live config and workspace roots.
#[derive(Clone)]
pub struct EntrySource {
    fetcher: Arc<dyn DataFetcher>,
    converter: Arc<dyn Converter>,
    config: watch::Receiver<IndexConfig>,
    roots: watch::Receiver<Vec<PathBuf>>,
}

impl EntrySource {
    pub fn new(
        fetcher: Arc<dyn DataFetcher>,
        converter: Arc<dyn Converter>,
        config: watch::Receiver<IndexConfig>,
        roots: watch::Receiver<Vec<PathBuf>>,
    ) -> Self {
        Self {
            fetcher,
            converter,
            config,
            roots,
        }
    }

    #[must_use]
    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.borrow().clone()
    }

    /// Fetches and converts `uris` (or everything when `None`).
    pub async fn load(
        &self,
        uris: Option<&[PathBuf]>,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<LoadedEntries> {
        let config = self.config.borrow().clone();
        let roots = self.roots();
        let records = self
            .fetcher
            .fetch(
                FetchRequest {
                    roots: &roots,
                    uris,
                    config: &config,
                },
                cancel,
                progress,
            )
            .await?;
        let entries = self.converter.convert(records, &config, cancel)?;
        Ok(LoadedEntries {
            entries,
            config_fingerprint: config.scope_fingerprint(),
        })
    }
}
