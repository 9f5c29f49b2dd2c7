use crate::config::IndexConfig;
use crate::entry::{IndexEntry, RawRecord};
use crate::error::{IndexerError, Result};
use tokio_util::sync::CancellationToken;

const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Turns raw fetch records into index entries.
pub trait Converter: Send + Sync {
    fn convert(
        &self,
        records: Vec<RawRecord>,
        config: &IndexConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<IndexEntry>>;
}

/// Default converter: applies the configured items filter and fills in
/// the description line pickers display under each entry.
#[derive(Debug, Default, Clone)]
pub struct EntryConverter;

impl EntryConverter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Converter for EntryConverter {
    fn convert(
        &self,
        records: Vec<RawRecord>,
        config: &IndexConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<IndexEntry>> {
        let filter = &config.items_filter;
        let mut entries = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            if idx % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(IndexerError::Cancelled);
            }
            let entry = match record {
                RawRecord::File { uri } => {
                    let detail = uri
                        .parent()
                        .map(|parent| parent.display().to_string())
                        .unwrap_or_default();
                    IndexEntry::file(uri).with_detail(detail)
                }
                RawRecord::Symbol {
                    uri,
                    name,
                    kind,
                    range,
                    container,
                } => {
                    let detail = container.unwrap_or_else(|| {
                        uri.file_name()
                            .map(|name| name.to_string_lossy().to_string())
                            .unwrap_or_default()
                    });
                    IndexEntry::symbol(uri, name, kind, range).with_detail(detail)
                }
            };
            if filter.allows(entry.kind, &entry.label) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
