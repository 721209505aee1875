//! Expected-schedule reconciliation
//!
//! Compares the niftis found for a session against the site's expected
//! schedule and produces the ordered table shown at the top of the report.
//!
//! # Algorithm
//! 1. Sort discovered files by acquisition sequence number
//! 2. For each file with a declared tag: bump the tag's counter, bookmark it
//!    as `<tag><n>`, flag counters above the expected count as repeats, and
//!    take the next position from the tag's ordering queue ([`Position::Last`]
//!    once the queue is drained)
//! 3. Append one `missing(<n>)` row per tag found fewer times than expected
//! 4. Stable-sort rows by position
//!
//! # Missing-row placement
//! A missing row takes the front of the tag's remaining queue after step 2,
//! which is the next unused protocol slot of a partially matched tag. Only
//! when the matched files drained the queue does it fall back to
//! [`Position::Last`], and so land after every other tag's rows. Missing rows
//! are not moved behind all protocol slots.

use std::collections::VecDeque;
use std::fmt;

use dmqc_common::config::{ExpectedSchedule, Ordering};
use indexmap::IndexMap;

use crate::subject::AcquiredFile;

/// Display position of a table row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Position {
    /// Slot from the site's acquisition protocol
    Protocol(u32),
    /// Ordering queue exhausted; sorts after every protocol slot
    Last,
}

/// Annotation shown in the Notes column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowNote {
    None,
    RepeatedScan,
    /// Number of expected acquisitions not found
    Missing(u32),
}

impl fmt::Display for RowNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowNote::None => Ok(()),
            RowNote::RepeatedScan => f.write_str("Repeated Scan"),
            RowNote::Missing(n) => write!(f, "missing({})", n),
        }
    }
}

/// One row of the reconciliation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationRow {
    pub tag: String,
    /// Absent for missing rows
    pub file: Option<AcquiredFile>,
    /// `<tag><occurrence>`, absent for missing rows
    pub bookmark: Option<String>,
    pub note: RowNote,
    pub position: Position,
}

/// Ordered reconciliation result
#[derive(Debug, Clone, Default)]
pub struct ReconciliationTable {
    pub rows: Vec<ReconciliationRow>,
    /// Final occurrence counter per declared tag, in declaration order
    pub counts: IndexMap<String, u32>,
}

impl ReconciliationTable {
    pub fn missing_rows(&self) -> impl Iterator<Item = &ReconciliationRow> {
        self.rows.iter().filter(|r| matches!(r.note, RowNote::Missing(_)))
    }

    pub fn matched_rows(&self) -> impl Iterator<Item = &ReconciliationRow> {
        self.rows.iter().filter(|r| r.file.is_some())
    }
}

/// Per-tag ordering queue
#[derive(Debug, Clone)]
enum OrderQueue {
    Fixed(u32),
    Fifo(VecDeque<u32>),
}

impl OrderQueue {
    fn from_ordering(ordering: &Ordering) -> Self {
        match ordering {
            Ordering::Fixed(position) => OrderQueue::Fixed(*position),
            Ordering::Queue(positions) => OrderQueue::Fifo(positions.iter().copied().collect()),
        }
    }

    /// Consume the next position
    fn pop(&mut self) -> Position {
        match self {
            OrderQueue::Fixed(position) => Position::Protocol(*position),
            OrderQueue::Fifo(queue) => queue.pop_front().map_or(Position::Last, Position::Protocol),
        }
    }

    /// Front of what remains, without consuming
    fn remaining(&self) -> Position {
        match self {
            OrderQueue::Fixed(position) => Position::Protocol(*position),
            OrderQueue::Fifo(queue) => queue.front().copied().map_or(Position::Last, Position::Protocol),
        }
    }
}

/// Reconcile discovered files against the expected schedule
pub fn reconcile(discovered: &[AcquiredFile], schedule: &ExpectedSchedule) -> ReconciliationTable {
    let mut counts: IndexMap<String, u32> = schedule
        .iter()
        .map(|spec| (spec.tag.clone(), 0))
        .collect();
    let mut queues: IndexMap<&str, OrderQueue> = schedule
        .iter()
        .map(|spec| (spec.tag.as_str(), OrderQueue::from_ordering(&spec.order)))
        .collect();

    let mut sorted: Vec<&AcquiredFile> = discovered.iter().collect();
    sorted.sort_by_key(|file| file.series);

    let mut rows = Vec::with_capacity(sorted.len() + schedule.len());

    for file in sorted {
        let Some(spec) = schedule.get(&file.tag) else {
            continue;
        };

        let count = counts.entry(file.tag.clone()).or_insert(0);
        *count += 1;

        let note = if *count > spec.count {
            RowNote::RepeatedScan
        } else {
            RowNote::None
        };
        let position = queues
            .get_mut(spec.tag.as_str())
            .map_or(Position::Last, OrderQueue::pop);

        rows.push(ReconciliationRow {
            tag: file.tag.clone(),
            file: Some(file.clone()),
            bookmark: Some(format!("{}{}", file.tag, count)),
            note,
            position,
        });
    }

    for spec in schedule.iter() {
        let found = counts.get(&spec.tag).copied().unwrap_or(0);
        if found < spec.count {
            let position = queues
                .get(spec.tag.as_str())
                .map_or(Position::Last, OrderQueue::remaining);
            rows.push(ReconciliationRow {
                tag: spec.tag.clone(),
                file: None,
                bookmark: None,
                note: RowNote::Missing(spec.count - found),
                position,
            });
        }
    }

    rows.sort_by_key(|row| row.position);

    ReconciliationTable { rows, counts }
}
