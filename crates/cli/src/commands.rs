use anyhow::{Context, Result};
use everywhere_indexer::{
    ConfigSource, EntryConverter, FsDataFetcher, IndexConfig, IndexEntry, IndexEvent,
    WorkspaceIndex, WorkspaceOptions, DEFAULT_POLL_INTERVAL, DEFAULT_PROGRESS_SETTLE,
};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::MissedTickBehavior;

const MIN_RELOAD_INTERVAL_MS: u64 = 50;

async fn load_config(path: Option<&Path>) -> Result<ConfigSource> {
    match path {
        Some(path) => ConfigSource::from_file(path)
            .await
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(ConfigSource::fixed(IndexConfig::default())),
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(root)
        .with_context(|| format!("workspace root {} is not accessible", root.display()))
}

fn start_index(roots: Vec<PathBuf>, config: &ConfigSource, settle: Duration) -> WorkspaceIndex {
    let options = WorkspaceOptions {
        progress_settle: settle,
        ..WorkspaceOptions::new(roots)
    };
    WorkspaceIndex::start(
        Arc::new(FsDataFetcher::new()),
        Arc::new(EntryConverter::new()),
        config.subscribe(),
        options,
    )
}

pub async fn run_index(root: PathBuf, config: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_config(config.as_deref()).await?;
    let root = canonical_root(&root)?;
    let index = start_index(vec![root], &config, Duration::ZERO);
    let mut events = index.subscribe();

    index.index("cli").await.context("indexing failed")?;
    let entries = index.get_data().unwrap_or_else(|| Arc::from(Vec::new()));

    let mut out = BufWriter::new(std::io::stdout().lock());
    for entry in entries.iter() {
        if json {
            writeln!(out, "{}", serde_json::to_string(entry)?)?;
        } else {
            writeln!(out, "{}", format_entry(entry))?;
        }
    }
    out.flush()?;

    loop {
        match events.try_recv() {
            Ok(IndexEvent::Rebuilt(stats)) => eprintln!(
                "Indexed {} files, {} symbols in {}ms",
                stats.files, stats.symbols, stats.duration_ms
            ),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    index.shutdown();
    Ok(())
}

pub async fn run_watch(
    roots: Vec<PathBuf>,
    config_path: Option<PathBuf>,
    init: bool,
    reload_ms: u64,
) -> Result<()> {
    let config = load_config(config_path.as_deref()).await?;
    let roots = roots
        .iter()
        .map(|root| canonical_root(root))
        .collect::<Result<Vec<_>>>()?;
    let index = start_index(roots, &config, DEFAULT_PROGRESS_SETTLE);
    let _watcher = index
        .watch_filesystem(DEFAULT_POLL_INTERVAL)
        .context("failed to start filesystem watcher")?;
    let mut events = index.subscribe();

    let mut initialized = init || config.current().should_init_on_startup;
    if initialized {
        index.request_index("startup")?;
    } else {
        log::info!("Index will be built on the first workspace change");
    }

    let mut reload = tokio::time::interval(Duration::from_millis(
        reload_ms.max(MIN_RELOAD_INTERVAL_MS),
    ));
    reload.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            _ = reload.tick(), if config_path.is_some() => {
                match config.reload().await {
                    Ok(true) => log::info!("Config reloaded"),
                    Ok(false) => {}
                    Err(err) => log::warn!("Config reload failed: {err}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if !initialized && matches!(event, IndexEvent::WillProcess) {
                        initialized = true;
                        index.request_index("first request")?;
                    }
                    report(&event);
                }
                Err(RecvError::Lagged(skipped)) => log::debug!("Skipped {skipped} index events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    index.shutdown();
    Ok(())
}

fn report(event: &IndexEvent) {
    match event {
        IndexEvent::Rebuilt(stats) => println!(
            "rebuilt ({}): {} files, {} symbols in {}ms",
            stats.reason, stats.files, stats.symbols, stats.duration_ms
        ),
        IndexEvent::WillReindexOnConfigChange => println!("config scope changed, reindexing"),
        IndexEvent::DebounceToggled { enabled } => println!("debounce enabled: {enabled}"),
        IndexEvent::Diagnostic { origin, message } => eprintln!("error ({origin}): {message}"),
        IndexEvent::Progress(update) => log::debug!("indexing {}%", update.percent),
        IndexEvent::WillExecute(intent) => log::debug!("{intent}"),
        IndexEvent::WillProcess | IndexEvent::DidProcess | IndexEvent::BurstStarted { .. } => {
            log::trace!("{event:?}");
        }
    }
}

fn format_entry(entry: &IndexEntry) -> String {
    let kind = entry.kind.filter_name();
    let location = match &entry.range {
        Some(range) => format!("{}:{}", entry.uri.display(), range.start_line + 1),
        None => entry.uri.display().to_string(),
    };
    match &entry.detail {
        Some(detail) if !detail.is_empty() => {
            format!("{kind:<10} {:<32} {detail}  {location}", entry.label)
        }
        _ => format!("{kind:<10} {:<32} {location}", entry.label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use everywhere_indexer::{SourceRange, SymbolKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_symbols_with_one_based_lines() {
        let entry = IndexEntry::symbol(
            "/w/src/lib.rs",
            "run",
            SymbolKind::Function,
            SourceRange::line(4, 7, 10),
        )
        .with_detail("lib.rs");
        assert_eq!(
            format_entry(&entry),
            format!("function   {:<32} lib.rs  /w/src/lib.rs:5", "run")
        );
    }

    #[test]
    fn formats_files_without_range() {
        let entry = IndexEntry::file("/w/a.ts");
        assert!(format_entry(&entry).starts_with("file       a.ts"));
        assert!(format_entry(&entry).ends_with("/w/a.ts"));
    }

    #[tokio::test]
    async fn missing_config_file_is_reported_with_its_path() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.toml");
        let err = load_config(Some(&missing)).await.err().unwrap();
        assert!(err.to_string().contains("nope.toml"));
    }
}
