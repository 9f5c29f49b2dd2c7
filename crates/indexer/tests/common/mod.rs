#![allow(dead_code)]

use async_trait::async_trait;
use everywhere_indexer::{
    DataFetcher, EntryConverter, FetchRequest, IndexConfig, IndexEvent, IndexerError, Intent,
    IntentKind, ProgressReporter, RawRecord, Result, RouterTimings, SourceRange, SymbolKind,
    WorkspaceIndex, WorkspaceOptions,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

/// Holds full scans until released.
pub struct Gate {
    pub entered: Notify,
    pub release: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

/// In-memory workspace: file path -> symbol names.
#[derive(Default)]
pub struct FakeFetcher {
    files: Mutex<BTreeMap<PathBuf, Vec<String>>>,
    failing: Mutex<BTreeSet<PathBuf>>,
    failing_full_scans: Mutex<bool>,
    gate: Mutex<Option<Arc<Gate>>>,
    targeted: Mutex<Vec<Vec<PathBuf>>>,
    full_scans: Mutex<usize>,
}

impl FakeFetcher {
    pub fn with_files(files: &[(&str, &[&str])]) -> Arc<Self> {
        let fetcher = Self::default();
        for (path, symbols) in files {
            fetcher.put(path, symbols);
        }
        Arc::new(fetcher)
    }

    pub fn put(&self, path: &str, symbols: &[&str]) {
        self.files.lock().unwrap().insert(
            PathBuf::from(path),
            symbols.iter().map(|s| (*s).to_string()).collect(),
        );
    }

    pub fn delete(&self, path: &str) {
        self.files.lock().unwrap().remove(Path::new(path));
    }

    /// Moves every file under `from` to the same relative place under `to`.
    pub fn rename_dir(&self, from: &str, to: &str) {
        let mut files = self.files.lock().unwrap();
        let moved: Vec<PathBuf> = files
            .keys()
            .filter(|path| path.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            let symbols = files.remove(&old).unwrap();
            let relative = old.strip_prefix(from).unwrap();
            files.insert(Path::new(to).join(relative), symbols);
        }
    }

    pub fn fail_on(&self, path: &str) {
        self.failing.lock().unwrap().insert(PathBuf::from(path));
    }

    /// Makes every later full scan fail until [`FakeFetcher::heal`].
    pub fn fail_full_scans(&self) {
        *self.failing_full_scans.lock().unwrap() = true;
    }

    pub fn heal(&self) {
        *self.failing_full_scans.lock().unwrap() = false;
        self.failing.lock().unwrap().clear();
    }

    pub fn gate_full_scans(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn ungate(&self) {
        self.gate.lock().unwrap().take();
    }

    pub fn targeted_fetches(&self) -> Vec<Vec<PathBuf>> {
        self.targeted.lock().unwrap().clone()
    }

    pub fn full_scans(&self) -> usize {
        *self.full_scans.lock().unwrap()
    }

    fn records_for(&self, path: &Path, symbols: &[String]) -> Vec<RawRecord> {
        let mut records = vec![RawRecord::File {
            uri: path.to_path_buf(),
        }];
        for (line, name) in symbols.iter().enumerate() {
            records.push(RawRecord::Symbol {
                uri: path.to_path_buf(),
                name: name.clone(),
                kind: SymbolKind::Function,
                range: SourceRange::line(line as u32, 0, name.len() as u32),
                container: None,
            });
        }
        records
    }
}

#[async_trait]
impl DataFetcher for FakeFetcher {
    async fn fetch(
        &self,
        request: FetchRequest<'_>,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<Vec<RawRecord>> {
        let selected: Vec<(PathBuf, Vec<String>)> = match request.uris {
            None => {
                *self.full_scans.lock().unwrap() += 1;
                if *self.failing_full_scans.lock().unwrap() {
                    return Err(IndexerError::fetch("full scan", "simulated failure"));
                }
                let gate = self.gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.entered.notify_one();
                    tokio::select! {
                        () = cancel.cancelled() => return Err(IndexerError::Cancelled),
                        permit = gate.release.acquire() => permit.unwrap().forget(),
                    }
                }
                let files = self.files.lock().unwrap();
                let selected = files
                    .iter()
                    .filter(|(path, _)| request.roots.iter().any(|root| path.starts_with(root)))
                    .map(|(path, symbols)| (path.clone(), symbols.clone()))
                    .collect();
                selected
            }
            Some(uris) => {
                self.targeted.lock().unwrap().push(uris.to_vec());
                if let Some(bad) = uris
                    .iter()
                    .find(|uri| self.failing.lock().unwrap().contains(*uri))
                {
                    return Err(IndexerError::fetch(bad.display(), "simulated failure"));
                }
                let files = self.files.lock().unwrap();
                let selected = files
                    .iter()
                    .filter(|(path, _)| uris.iter().any(|uri| path.starts_with(uri)))
                    .map(|(path, symbols)| (path.clone(), symbols.clone()))
                    .collect();
                selected
            }
        };

        let total = selected.len();
        let mut records = Vec::new();
        for (path, symbols) in selected {
            if cancel.is_cancelled() {
                return Err(IndexerError::Cancelled);
            }
            records.extend(self.records_for(&path, &symbols));
            progress.item_indexed(total);
        }
        Ok(records)
    }
}

pub struct Harness {
    pub index: WorkspaceIndex,
    pub fetcher: Arc<FakeFetcher>,
    pub config: watch::Sender<IndexConfig>,
    pub events: broadcast::Receiver<IndexEvent>,
}

pub fn start(fetcher: Arc<FakeFetcher>, roots: &[&str]) -> Harness {
    start_with(fetcher, roots, IndexConfig::default())
}

pub fn start_with(fetcher: Arc<FakeFetcher>, roots: &[&str], config: IndexConfig) -> Harness {
    let (config_tx, config_rx) = watch::channel(config);
    let options = WorkspaceOptions {
        timings: RouterTimings::default(),
        rename_window: Duration::from_secs(2),
        progress_settle: Duration::ZERO,
        ..WorkspaceOptions::new(roots.iter().map(PathBuf::from))
    };
    let index = WorkspaceIndex::start(
        fetcher.clone(),
        Arc::new(EntryConverter::new()),
        config_rx,
        options,
    );
    let events = index.subscribe();
    Harness {
        index,
        fetcher,
        config: config_tx,
        events,
    }
}

/// Sorted, de-duplicated uris currently in the index.
pub fn indexed_uris(index: &WorkspaceIndex) -> Vec<PathBuf> {
    let mut uris: Vec<PathBuf> = index
        .get_data()
        .map(|entries| entries.iter().map(|entry| entry.uri.clone()).collect())
        .unwrap_or_default();
    uris.sort();
    uris.dedup();
    uris
}

/// Everything currently buffered on `events`.
pub fn drain(events: &mut broadcast::Receiver<IndexEvent>) -> Vec<IndexEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Intents that started executing, as `kind (origin)` strings.
pub fn executed(events: &[IndexEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            IndexEvent::WillExecute(intent) => Some(describe(intent)),
            _ => None,
        })
        .collect()
}

pub fn describe(intent: &Intent) -> String {
    match &intent.kind {
        IntentKind::Update(uri) => format!("update {}", uri.display()),
        IntentKind::Remove(uri) => format!("remove {}", uri.display()),
        IntentKind::Rebuild => format!("rebuild ({})", intent.origin),
    }
}

pub fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}
