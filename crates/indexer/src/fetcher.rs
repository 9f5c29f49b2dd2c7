use crate::config::{IndexConfig, PathFilter};
use crate::entry::{RawRecord, SourceRange, SymbolKind};
use crate::error::{IndexerError, Result};
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use ignore::WalkBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const MAX_SYMBOL_SCAN_BYTES: u64 = 1024 * 1024;

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "java", "kt", "cs", "swift",
];

/// What a fetch should cover.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub roots: &'a [PathBuf],
    /// `None` means a full scan of every root.
    pub uris: Option<&'a [PathBuf]>,
    pub config: &'a IndexConfig,
}

/// Supplies raw file and symbol records for the index.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// Fetches records for `request`, calling `progress` once per scanned file.
    ///
    /// Implementations must stop early when `cancel` fires.
    async fn fetch(
        &self,
        request: FetchRequest<'_>,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<Vec<RawRecord>>;
}

/// Filesystem scanner: gitignore-aware walk plus line-based symbol sniffing.
#[derive(Debug, Default, Clone)]
pub struct FsDataFetcher;

impl FsDataFetcher {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataFetcher for FsDataFetcher {
    async fn fetch(
        &self,
        request: FetchRequest<'_>,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<Vec<RawRecord>> {
        let filter = request.config.path_filter()?;
        let targets: Vec<(PathBuf, PathBuf)> = match request.uris {
            None => request
                .roots
                .iter()
                .map(|root| (root.clone(), root.clone()))
                .collect(),
            Some(uris) => uris
                .iter()
                .map(|uri| (owning_root(request.roots, uri), uri.clone()))
                .collect(),
        };

        let files = tokio::task::spawn_blocking(move || collect_files(&targets, &filter))
            .await
            .map_err(|e| IndexerError::Other(format!("file scan task failed: {e}")))??;

        let total = files.len();
        let mut records = Vec::with_capacity(total);
        for file in files {
            if cancel.is_cancelled() {
                return Err(IndexerError::Cancelled);
            }
            match scan_symbols(&file).await {
                Ok(symbols) => {
                    records.push(RawRecord::File { uri: file });
                    records.extend(symbols);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    log::debug!("{} vanished during scan", file.display());
                }
                Err(err) => return Err(IndexerError::fetch(file.display(), err.to_string())),
            }
            progress.item_indexed(total);
        }
        Ok(records)
    }
}

fn owning_root(roots: &[PathBuf], uri: &Path) -> PathBuf {
    roots
        .iter()
        .filter(|root| uri.starts_with(root))
        .max_by_key(|root| root.as_os_str().len())
        .cloned()
        .or_else(|| uri.parent().map(Path::to_path_buf))
        .unwrap_or_default()
}

fn collect_files(targets: &[(PathBuf, PathBuf)], filter: &PathFilter) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for (root, target) in targets {
        let metadata = match std::fs::metadata(target) {
            Ok(metadata) => metadata,
            Err(err) if is_missing(&err, target) => continue,
            Err(err) => return Err(IndexerError::fetch(target.display(), err.to_string())),
        };

        if metadata.is_file() {
            if filter.allows_file(root, target) {
                files.push(target.clone());
            }
            continue;
        }

        let walk_root = root.clone();
        let walk_filter = filter.clone();
        let walker = WalkBuilder::new(target)
            .hidden(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !is_dir || walk_filter.allows_dir(&walk_root, entry.path())
            })
            .build();
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_some_and(|ft| ft.is_file())
                && filter.allows_file(root, entry.path())
            {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// A target is missing when it does not exist or sits below a regular file
/// (`a.rs/x.rs`), which is what re-rooting onto a file produces.
fn is_missing(err: &std::io::Error, target: &Path) -> bool {
    err.kind() == ErrorKind::NotFound || target.ancestors().skip(1).any(Path::is_file)
}

struct SymbolPattern {
    regex: Regex,
    kind: SymbolKind,
}

static SYMBOL_PATTERNS: Lazy<Vec<SymbolPattern>> = Lazy::new(|| {
    const VIS: &str = r"^\s*(?:pub(?:\([^)]*\))?\s+)?";
    const EXPORT: &str = r"^\s*(?:export\s+)?(?:default\s+)?";
    let table: Vec<(String, SymbolKind)> = vec![
        (format!(r"{VIS}(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)"), SymbolKind::Function),
        (format!(r"{VIS}struct\s+([A-Za-z_]\w*)"), SymbolKind::Struct),
        (format!(r"{VIS}enum\s+([A-Za-z_]\w*)"), SymbolKind::Enum),
        (format!(r"{VIS}trait\s+([A-Za-z_]\w*)"), SymbolKind::Interface),
        (format!(r"{VIS}mod\s+([A-Za-z_]\w*)"), SymbolKind::Module),
        (format!(r"{VIS}(?:const|static)\s+([A-Z_][A-Z0-9_]*)\s*:"), SymbolKind::Constant),
        (format!(r"{VIS}type\s+([A-Za-z_]\w*)\s*="), SymbolKind::TypeAlias),
        (format!(r"{EXPORT}(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)"), SymbolKind::Function),
        (format!(r"{EXPORT}(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)"), SymbolKind::Class),
        (format!(r"{EXPORT}interface\s+([A-Za-z_$][\w$]*)"), SymbolKind::Interface),
        (r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)".to_string(), SymbolKind::Function),
        (r"^\s*class\s+([A-Za-z_]\w*)".to_string(), SymbolKind::Class),
        (r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)".to_string(), SymbolKind::Function),
    ];
    table
        .into_iter()
        .map(|(pattern, kind)| SymbolPattern {
            regex: Regex::new(&pattern).expect("symbol pattern compiles"),
            kind,
        })
        .collect()
});

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

async fn scan_symbols(path: &Path) -> std::io::Result<Vec<RawRecord>> {
    let metadata = tokio::fs::metadata(path).await?;
    if !has_source_extension(path) || metadata.len() > MAX_SYMBOL_SCAN_BYTES {
        return Ok(Vec::new());
    }
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        // Not UTF-8: still indexed as a file, without symbols.
        Err(err) if err.kind() == ErrorKind::InvalidData => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    Ok(extract_symbols(path, &content))
}

fn extract_symbols(path: &Path, content: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let Some((pattern, name)) = SYMBOL_PATTERNS.iter().find_map(|pattern| {
            pattern
                .regex
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|name| (pattern, name))
        }) else {
            continue;
        };
        #[allow(clippy::cast_possible_truncation)]
        let range = SourceRange::line(line_no as u32, name.start() as u32, name.end() as u32);
        records.push(RawRecord::Symbol {
            uri: path.to_path_buf(),
            name: name.as_str().to_string(),
            kind: pattern.kind,
            range,
            container: None,
        });
    }
    records
}
