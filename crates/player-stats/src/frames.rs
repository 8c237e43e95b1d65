//! Dropped-frame accounting for pipeline elements.
//!
//! Pipeline elements report cumulative `(processed, dropped)` counters from their own
//! streaming threads; the statistics view reads a summary from the UI timer. The map is
//! guarded by a mutex so both sides can run concurrently.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use stats_types::DroppedFramesReport;

/// Substring identifying rendering/output elements.
const SINK_MARKER: &str = "sink";

/// Opaque identity of a pipeline element (its handle address or any stable id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Frame counters of one element, with the values seen at first report after a reset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementFrameStat {
    pub element: ElementId,
    pub name: String,
    pub processed: u64,
    pub dropped: u64,
    pub base_processed: u64,
    pub base_dropped: u64,
}

impl ElementFrameStat {
    fn is_sink(&self) -> bool {
        self.name.contains(SINK_MARKER)
    }
}

/// Baseline-relative totals for a group of elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTotals {
    pub processed: u64,
    pub dropped: u64,
}

impl FrameTotals {
    /// Dropped share in percent. An empty group counts as one processed frame (0%).
    pub fn dropped_pct(&self) -> f64 {
        let processed = if self.processed.saturating_add(self.dropped) == 0 {
            1
        } else {
            self.processed
        };
        self.dropped as f64 * 100.0 / (processed + self.dropped) as f64
    }

    pub fn total(&self) -> u64 {
        self.processed.saturating_add(self.dropped)
    }
}

/// Summary over all elements and over sink elements only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DroppedFramesSummary {
    pub all: FrameTotals,
    pub sinks: FrameTotals,
}

impl DroppedFramesSummary {
    pub fn to_report(&self) -> DroppedFramesReport {
        DroppedFramesReport {
            total_frames: self.all.total(),
            dropped_pct: self.all.dropped_pct(),
            sink_dropped_pct: self.sinks.dropped_pct(),
        }
    }
}

/// Thread-safe element → frame counters map.
#[derive(Debug, Default)]
pub struct FrameDropTracker {
    elements: Mutex<HashMap<ElementId, ElementFrameStat>>,
}

impl FrameDropTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ElementId, ElementFrameStat>> {
        // Counters stay consistent even if a reporting thread panicked mid-call.
        self.elements.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the cumulative counters of `element`.
    ///
    /// The first report after a reset becomes the element's baseline. Counters never move
    /// backwards between resets; a lower value is ignored.
    pub fn report(&self, element: ElementId, name: &str, processed: u64, dropped: u64) {
        let mut elements = self.lock();
        match elements.get_mut(&element) {
            Some(stat) => {
                if processed < stat.processed || dropped < stat.dropped {
                    tracing::debug!(
                        element = element.0,
                        name = %stat.name,
                        processed,
                        dropped,
                        "frame counters went backwards; keeping previous values"
                    );
                }
                stat.processed = stat.processed.max(processed);
                stat.dropped = stat.dropped.max(dropped);
            }
            None => {
                elements.insert(
                    element,
                    ElementFrameStat {
                        element,
                        name: name.to_string(),
                        processed,
                        dropped,
                        base_processed: processed,
                        base_dropped: dropped,
                    },
                );
            }
        }
    }

    /// Forget all elements; the next report of each re-establishes its baseline.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of one element's counters.
    pub fn get(&self, element: ElementId) -> Option<ElementFrameStat> {
        self.lock().get(&element).cloned()
    }

    /// Baseline-relative totals.
    ///
    /// Elements see different subsets of the stream, so the largest processed count stands
    /// in for the pipeline frame count while drops add up across elements.
    pub fn summary(&self) -> DroppedFramesSummary {
        let elements = self.lock();
        DroppedFramesSummary {
            all: totals(elements.values()),
            sinks: totals(elements.values().filter(|s| s.is_sink())),
        }
    }
}

fn totals<'a>(stats: impl Iterator<Item = &'a ElementFrameStat>) -> FrameTotals {
    let mut max_processed = 0u64;
    let mut max_base_processed = 0u64;
    let mut dropped = 0u64;
    let mut base_dropped = 0u64;
    for stat in stats {
        max_processed = max_processed.max(stat.processed);
        max_base_processed = max_base_processed.max(stat.base_processed);
        dropped = dropped.saturating_add(stat.dropped);
        base_dropped = base_dropped.saturating_add(stat.base_dropped);
    }
    FrameTotals {
        processed: max_processed.saturating_sub(max_base_processed),
        dropped: dropped.saturating_sub(base_dropped),
    }
}
