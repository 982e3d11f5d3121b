use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::document::Document;

/// Last processed position per stream, in stream registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPositions {
    entries: Vec<(String, i64)>,
}

impl StreamPositions {
    /// No tracked streams.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Last position of `stream`; untracked streams are at 0.
    pub fn get(&self, stream: &str) -> i64 {
        self.entries
            .iter()
            .find(|(name, _)| name == stream)
            .map_or(0, |(_, position)| *position)
    }

    /// Set the position of `stream`, tracking it if needed.
    pub fn set(&mut self, stream: &str, position: i64) {
        match self.entries.iter_mut().find(|(name, _)| name == stream) {
            Some(entry) => entry.1 = position,
            None => self.entries.push((stream.to_string(), position)),
        }
    }

    /// Whether `stream` is tracked.
    pub fn contains(&self, stream: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == stream)
    }

    /// Tracked stream names in order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// `(stream, position)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(name, position)| (name.as_str(), *position))
    }

    /// Number of tracked streams.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no stream is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every stream.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Track `names` at position 0, keeping positions already recorded.
    ///
    /// The result lists `names` first, then previously tracked streams that
    /// are not among them.
    pub fn seed<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut seeded = Self::new();
        for name in names {
            if !seeded.contains(&name) {
                let position = self.get(&name);
                seeded.entries.push((name, position));
            }
        }
        for (name, position) in self.entries.drain(..) {
            if !seeded.contains(&name) {
                seeded.entries.push((name, position));
            }
        }
        *self = seeded;
    }

    /// Overlay positions loaded from a checkpoint; loaded values win.
    pub fn merge_stored(&mut self, stored: &Self) {
        for (name, position) in stored.iter() {
            self.set(name, position);
        }
    }

    /// Checkpoint representation: `{stream: position}`.
    pub fn to_document(&self) -> Document {
        self.entries
            .iter()
            .map(|(name, position)| (name.clone(), Value::from(*position)))
            .collect()
    }

    /// Read a checkpoint representation, skipping non-integer entries.
    pub fn from_document(document: &Document) -> Self {
        Self {
            entries: document
                .iter()
                .filter_map(|(name, value)| value.as_i64().map(|position| (name.clone(), position)))
                .collect(),
        }
    }
}

/// Positions expected but not yet observed, per stream.
///
/// Gaps are kept as disjoint half-open ranges `[start, end)` keyed by
/// `start`, so a large jump in positions costs one entry.
#[derive(Debug, Clone, Default)]
pub struct GapTracker {
    gaps: HashMap<String, BTreeMap<i64, i64>>,
}

impl GapTracker {
    /// No gaps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `position` of `stream` is being applied.
    ///
    /// Positions skipped between the last recorded one and `position` become
    /// gaps, `position` itself stops being a gap, and the recorded position
    /// only ever moves forward.
    pub fn observe(&mut self, positions: &mut StreamPositions, stream: &str, position: i64) {
        let last = positions.get(stream);
        let expected = last.saturating_add(1);
        if expected < position {
            // Existing ranges all end at or before `last`, so this one is disjoint.
            self.gaps
                .entry(stream.to_string())
                .or_default()
                .insert(expected, position);
        }
        if let Some(ranges) = self.gaps.get_mut(stream) {
            close(ranges, position);
            if ranges.is_empty() {
                self.gaps.remove(stream);
            }
        }
        if position > last {
            positions.set(stream, position);
        }
    }

    /// Whether `position` of `stream` is a recorded gap.
    pub fn contains(&self, stream: &str, position: i64) -> bool {
        self.gaps
            .get(stream)
            .and_then(|ranges| ranges.range(..=position).next_back())
            .is_some_and(|(_, end)| position < *end)
    }

    /// Number of missing positions across all streams.
    pub fn len(&self) -> usize {
        self.gaps
            .values()
            .flat_map(BTreeMap::iter)
            .map(|(start, end)| usize::try_from(end - start).unwrap_or(usize::MAX))
            .fold(0, usize::saturating_add)
    }

    /// Number of disjoint gap ranges across all streams.
    pub fn range_count(&self) -> usize {
        self.gaps.values().map(BTreeMap::len).sum()
    }

    /// Whether there are no open gaps.
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Forget every gap.
    pub fn clear(&mut self) {
        self.gaps.clear();
    }
}

/// Remove `position` from the range covering it, splitting that range.
fn close(ranges: &mut BTreeMap<i64, i64>, position: i64) {
    let Some((&start, &end)) = ranges.range(..=position).next_back() else {
        return;
    };
    if position >= end {
        return;
    }
    ranges.remove(&start);
    if start < position {
        ranges.insert(start, position);
    }
    if position + 1 < end {
        ranges.insert(position + 1, end);
    }
}

/// Whether a change feed event was already applied during catch-up.
///
/// True only when the change happened no later than the catch-up start of
/// its stream, its position is not past the recorded one and it is not a
/// recorded gap.
pub const fn is_already_processed(
    cluster_time: i64,
    catch_up_start: i64,
    position: i64,
    recorded: i64,
    is_gap: bool,
) -> bool {
    cluster_time <= catch_up_start && position <= recorded && !is_gap
}
