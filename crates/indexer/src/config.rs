use crate::entry::EntryKind;
use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::watch;

/// Directories that never carry indexable content.
const ALWAYS_IGNORED: &[&str] = &[".git", ".hg", ".svn"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExcludeMode {
    /// Use the `exclude` list of this config.
    #[default]
    SearchEverywhere,
    /// Use the enabled keys of `filesExclude` and `searchExclude`.
    FilesAndSearch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemsFilter {
    pub allowed_kinds: Vec<String>,
    pub ignored_kinds: Vec<String>,
    pub ignored_names: Vec<String>,
}

impl ItemsFilter {
    #[must_use]
    pub fn allows(&self, kind: EntryKind, label: &str) -> bool {
        let kind = kind.filter_name();
        if !self.allowed_kinds.is_empty() && !self.allowed_kinds.iter().any(|k| k == kind) {
            return false;
        }
        if self.ignored_kinds.iter().any(|k| k == kind) {
            return false;
        }
        !self
            .ignored_names
            .iter()
            .any(|name| !name.is_empty() && label.contains(name.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexConfig {
    pub exclude: Vec<String>,
    pub include: String,
    pub exclude_mode: ExcludeMode,
    pub files_exclude: BTreeMap<String, bool>,
    pub search_exclude: BTreeMap<String, bool>,
    pub use_debounce: bool,
    pub items_filter: ItemsFilter,
    pub should_init_on_startup: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            include: String::new(),
            exclude_mode: ExcludeMode::SearchEverywhere,
            files_exclude: BTreeMap::new(),
            search_exclude: BTreeMap::new(),
            use_debounce: false,
            items_filter: ItemsFilter::default(),
            should_init_on_startup: false,
        }
    }
}

/// Fields that decide what ends up in the index.
#[derive(Serialize)]
struct ScopeView<'a> {
    exclude: Vec<String>,
    include: &'a str,
    items_filter: &'a ItemsFilter,
}

impl IndexConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Exclude globs in effect for the configured mode.
    #[must_use]
    pub fn effective_excludes(&self) -> Vec<String> {
        match self.exclude_mode {
            ExcludeMode::SearchEverywhere => self.exclude.clone(),
            ExcludeMode::FilesAndSearch => {
                let mut merged: BTreeMap<&str, bool> = BTreeMap::new();
                for (pattern, enabled) in self.files_exclude.iter().chain(&self.search_exclude) {
                    merged.insert(pattern.as_str(), *enabled);
                }
                merged
                    .into_iter()
                    .filter(|(_, enabled)| *enabled)
                    .map(|(pattern, _)| pattern.to_string())
                    .collect()
            }
        }
    }

    /// Stable hash of the indexing scope (excludes, include, items filter).
    #[must_use]
    pub fn scope_fingerprint(&self) -> String {
        let view = ScopeView {
            exclude: self.effective_excludes(),
            include: self.include.trim(),
            items_filter: &self.items_filter,
        };
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    pub fn path_filter(&self) -> Result<PathFilter> {
        PathFilter::new(&self.effective_excludes(), self.include.trim())
    }
}

/// How a configuration change affects the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigImpact {
    Reindex,
    DebounceToggled,
    Unchanged,
}

impl ConfigImpact {
    #[must_use]
    pub fn classify(previous: &IndexConfig, current: &IndexConfig) -> Self {
        if previous.scope_fingerprint() != current.scope_fingerprint() {
            Self::Reindex
        } else if previous.use_debounce != current.use_debounce {
            Self::DebounceToggled
        } else {
            Self::Unchanged
        }
    }
}

/// Compiled include/exclude rules, matched against root-relative paths.
#[derive(Debug, Clone)]
pub struct PathFilter {
    exclude: GlobSet,
    include: Option<GlobSet>,
}

impl PathFilter {
    pub fn new(excludes: &[String], include: &str) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in excludes.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            builder.add(Glob::new(pattern)?);
        }
        let include = if include.is_empty() {
            None
        } else {
            let mut include_builder = GlobSetBuilder::new();
            include_builder.add(Glob::new(include)?);
            Some(include_builder.build()?)
        };
        Ok(Self {
            exclude: builder.build()?,
            include,
        })
    }

    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            exclude: GlobSet::empty(),
            include: None,
        }
    }

    /// Whether a directory should be descended into.
    #[must_use]
    pub fn allows_dir(&self, root: &Path, dir: &Path) -> bool {
        let relative = normalize_relative(root, dir);
        !is_always_ignored(&relative) && !self.exclude.is_match(&relative)
    }

    /// Whether a file belongs in the index.
    #[must_use]
    pub fn allows_file(&self, root: &Path, file: &Path) -> bool {
        let relative = normalize_relative(root, file);
        if is_always_ignored(&relative) || self.exclude.is_match(&relative) {
            return false;
        }
        self.include
            .as_ref()
            .map_or(true, |include| include.is_match(&relative))
    }

    /// Whether any component of the path is excluded; used for raw watcher paths.
    #[must_use]
    pub fn allows_event_path(&self, root: &Path, path: &Path) -> bool {
        let relative = normalize_relative(root, path);
        if is_always_ignored(&relative) {
            return false;
        }
        let mut prefix = PathBuf::new();
        for component in Path::new(&relative).components() {
            prefix.push(component);
            if self.exclude.is_match(&prefix) {
                return false;
            }
        }
        true
    }
}

fn normalize_relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut normalized = relative.to_string_lossy().to_string();
    if normalized.contains('\\') {
        normalized = normalized.replace('\\', "/");
    }
    normalized
}

fn is_always_ignored(relative: &str) -> bool {
    Path::new(relative).components().any(|component| match component {
        Component::Normal(name) => ALWAYS_IGNORED
            .iter()
            .any(|ignored| name.to_string_lossy() == *ignored),
        _ => false,
    })
}

/// Live configuration published through a `watch` channel.
pub struct ConfigSource {
    path: Option<PathBuf>,
    tx: watch::Sender<IndexConfig>,
}

impl ConfigSource {
    #[must_use]
    pub fn fixed(config: IndexConfig) -> Self {
        let (tx, _) = watch::channel(config);
        Self { path: None, tx }
    }

    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = IndexConfig::load(&path).await?;
        let (tx, _) = watch::channel(config);
        Ok(Self {
            path: Some(path),
            tx,
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<IndexConfig> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> IndexConfig {
        self.tx.borrow().clone()
    }

    /// Publishes `config`; subscribers are only woken when it differs.
    pub fn set(&self, config: IndexConfig) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        })
    }

    /// Re-reads the backing file. Returns `true` when the config changed.
    pub async fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let config = IndexConfig::load(path).await?;
        Ok(self.set(config))
    }
}
