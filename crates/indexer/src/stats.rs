use crate::entry::IndexEntry;
use serde::Serialize;
use std::time::SystemTime;

/// Summary of a completed full rebuild.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RebuildStats {
    pub files: usize,
    pub symbols: usize,
    pub duration_ms: u64,
    pub reason: String,
    pub completed_at: SystemTime,
}

impl RebuildStats {
    #[must_use]
    pub fn from_entries(entries: &[IndexEntry], reason: &str, duration_ms: u64) -> Self {
        let files = entries.iter().filter(|entry| entry.is_file()).count();
        let symbols = entries
            .iter()
            .filter(|entry| !entry.is_file() && !entry.is_help)
            .count();
        Self {
            files,
            symbols,
            duration_ms,
            reason: reason.to_string(),
            completed_at: SystemTime::now(),
        }
    }
}
