use std::collections::{HashSet, VecDeque};

use chrono::NaiveDate;

use crate::models::record::{FoundUnit, MatchedEntry};

/// Most raw records a job keeps when it has no queries.
pub const RAW_BUFFER_CAP: usize = 1000;

/// Merge freshly matched entries into the found unit for `unit_key`.
///
/// Existing entries come first; duplicates by (name, date) keep their first
/// occurrence. `raw_count` always reflects the latest fetch.
pub fn merge_unit(
    existing: Option<FoundUnit>,
    incoming: Vec<MatchedEntry>,
    unit_key: NaiveDate,
    raw_count: usize,
) -> FoundUnit {
    let previous = existing.map(|u| u.entries).unwrap_or_default();

    let mut seen = HashSet::new();
    let entries = previous
        .into_iter()
        .chain(incoming)
        .filter(|e| seen.insert((e.record.name.clone(), e.unit_key)))
        .collect();

    FoundUnit {
        unit_key,
        entries,
        raw_count,
    }
}

/// Append `items`, then drop the oldest until at most `cap` remain.
pub fn append_raw<T>(buffer: &mut VecDeque<T>, items: impl IntoIterator<Item = T>, cap: usize) {
    buffer.extend(items);
    let excess = buffer.len().saturating_sub(cap);
    buffer.drain(..excess);
}
