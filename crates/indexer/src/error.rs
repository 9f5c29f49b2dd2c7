use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    WalkError(#[from] ignore::Error),

    #[error("Glob error: {0}")]
    GlobError(#[from] globset::Error),

    #[error("Config error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Watcher error: {0}")]
    WatcherError(#[from] notify::Error),

    #[error("Fetch failed for {uri}: {reason}")]
    FetchFailed { uri: String, reason: String },

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Indexing cancelled")]
    Cancelled,

    #[error("Mutation queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub fn fetch(uri: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}
