use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Symbol categories produced by the scanner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Module,
    Class,
    Struct,
    Enum,
    Interface,
    Function,
    Method,
    Constant,
    Variable,
    TypeAlias,
}

impl SymbolKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Interface => "interface",
            Self::Function => "function",
            Self::Method => "method",
            Self::Constant => "constant",
            Self::Variable => "variable",
            Self::TypeAlias => "type_alias",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "symbol", rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Symbol(SymbolKind),
    Help,
}

impl EntryKind {
    /// Name used by the items filter (`"file"`, `"function"`, ...).
    #[must_use]
    pub const fn filter_name(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Symbol(kind) => kind.as_str(),
            Self::Help => "help",
        }
    }
}

/// Zero-based line/column span of a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceRange {
    #[must_use]
    pub const fn line(line: u32, start_column: u32, end_column: u32) -> Self {
        Self {
            start_line: line,
            start_column,
            end_line: line,
            end_column,
        }
    }
}

/// One searchable unit: a file, a symbol inside a file, or a synthetic help row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub uri: PathBuf,
    pub label: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<SourceRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub is_help: bool,
}

impl IndexEntry {
    pub fn file(uri: impl Into<PathBuf>) -> Self {
        let uri = uri.into();
        let label = uri
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| uri.to_string_lossy().to_string());
        Self {
            uri,
            label,
            kind: EntryKind::File,
            range: None,
            detail: None,
            is_help: false,
        }
    }

    pub fn symbol(
        uri: impl Into<PathBuf>,
        label: impl Into<String>,
        kind: SymbolKind,
        range: SourceRange,
    ) -> Self {
        Self {
            uri: uri.into(),
            label: label.into(),
            kind: EntryKind::Symbol(kind),
            range: Some(range),
            detail: None,
            is_help: false,
        }
    }

    pub fn help(phrase: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            uri: PathBuf::new(),
            label: phrase.into(),
            kind: EntryKind::Help,
            range: None,
            detail: Some(description.into()),
            is_help: true,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File)
    }

    #[must_use]
    pub fn belongs_to(&self, uri: &Path) -> bool {
        self.uri == uri
    }
}

/// Record returned by a [`crate::DataFetcher`] before conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    File {
        uri: PathBuf,
    },
    Symbol {
        uri: PathBuf,
        name: String,
        kind: SymbolKind,
        range: SourceRange,
        container: Option<String>,
    },
}
