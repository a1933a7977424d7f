//! Non-overlapping interval map used for per-pool last-writer tracking.

use std::collections::BTreeMap;

use depgraph_types::Span;

/// Map from disjoint half-open byte ranges to values.
///
/// Entries are keyed by start address. Because stored ranges never overlap,
/// their ends are sorted too, so an overlap query walks backwards from the
/// last entry starting before the query end and stops at the first entry
/// ending at or before the query start: `O(log n + k)` for `k` hits.
#[derive(Debug, Clone)]
pub struct IntervalMap<V> {
    entries: BTreeMap<u64, (u64, V)>,
}

impl<V> Default for IntervalMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Copy> IntervalMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored ranges intersecting `span`, in address order.
    pub fn overlapping(&self, span: Span) -> Vec<(Span, V)> {
        let mut hits = Vec::new();
        if span.is_empty() {
            return hits;
        }
        for (&start, &(end, value)) in self.entries.range(..span.end).rev() {
            if end <= span.start {
                break;
            }
            hits.push((Span::new(start, end), value));
        }
        hits.reverse();
        hits
    }

    /// Assign `value` to exactly `span`, trimming or splitting whatever
    /// stored ranges it overlaps.
    pub fn insert(&mut self, span: Span, value: V) {
        if span.is_empty() {
            return;
        }
        for (old, old_value) in self.overlapping(span) {
            self.entries.remove(&old.start);
            if old.start < span.start {
                self.entries.insert(old.start, (span.start, old_value));
            }
            if old.end > span.end {
                self.entries.insert(span.end, (old.end, old_value));
            }
        }
        self.entries.insert(span.start, (span.end, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Span, V)> + '_ {
        self.entries
            .iter()
            .map(|(&start, &(end, value))| (Span::new(start, end), value))
    }
}
