use crate::intent::Intent;
use crate::progress::ProgressUpdate;
use crate::stats::RebuildStats;
use std::path::PathBuf;

/// Lifecycle notifications published to index consumers.
///
/// Each occurrence is sent once, synchronously, on a broadcast channel.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    /// The queue was idle and its first intent is about to run.
    WillProcess,
    /// Immediately before `intent` is executed.
    WillExecute(Intent),
    /// The queue drained after processing.
    DidProcess,
    /// Only the debounce setting changed; consumers should re-subscribe.
    DebounceToggled { enabled: bool },
    /// A scope-affecting config change is about to enqueue a rebuild.
    WillReindexOnConfigChange,
    /// Leading edge of a debounced burst of content changes.
    BurstStarted { uri: PathBuf },
    Progress(ProgressUpdate),
    Rebuilt(RebuildStats),
    /// A failure surfaced to the user-facing layer.
    Diagnostic { origin: String, message: String },
}
