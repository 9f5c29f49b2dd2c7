use crate::events::IndexEvent;
use tokio::sync::broadcast;

/// One progress tick derived from an "item indexed" signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Percentage points added by this tick.
    pub increment: f64,
    /// Rounded running total, capped at 100.
    pub percent: u32,
}

/// Turns per-item signals of a streaming fetch into percentage increments.
///
/// The total is only known once the fetcher reports its first item, so the
/// step is computed lazily on the first signal and kept for the rest of the run.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    step: Option<f64>,
    current: f64,
    items: usize,
    sink: Option<broadcast::Sender<IndexEvent>>,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(sink: broadcast::Sender<IndexEvent>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// Reporter that counts but publishes nothing (targeted re-fetches).
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn item_indexed(&mut self, total: usize) -> ProgressUpdate {
        let step = *self.step.get_or_insert_with(|| {
            if total == 0 {
                100.0
            } else {
                100.0 / total as f64
            }
        });
        self.items += 1;
        self.current = (self.current + step).min(100.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let update = ProgressUpdate {
            increment: step,
            percent: self.current.round() as u32,
        };
        if let Some(sink) = &self.sink {
            let _ = sink.send(IndexEvent::Progress(update));
        }
        update
    }

    #[must_use]
    pub const fn items(&self) -> usize {
        self.items
    }

    pub fn reset(&mut self) {
        self.step = None;
        self.current = 0.0;
        self.items = 0;
    }
}
