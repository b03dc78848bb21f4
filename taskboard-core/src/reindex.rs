//! Position arithmetic for ordered scopes.
//!
//! Every scope holds entries whose `order_index` values form the gap-free
//! sequence `0..n`. The functions here take a snapshot of the sibling
//! placements and return the [`IndexShift`]s that keep the sequence intact
//! after an insert, reorder, remove or relocation. They never perform I/O
//! and never suspend; callers persist the shifts.
//!
//! ```text
//! reorder(C2 → 0)      [C0 C1 C2]  →  [C2 C0 C1]
//! remove(T1)           [T0 T1 T2]  →  [T0 T2]
//! relocate(T, K1→K2)   K1 [T U] K2 [V]  →  K1 [U] K2 [V T]
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The position of one entry as seen in a sibling snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub id: Uuid,
    pub order_index: u32,
    /// Tie-break for re-sequencing duplicated indices
    pub created_at: u64,
}

impl Placement {
    pub fn new(id: Uuid, order_index: u32) -> Self {
        Self {
            id,
            order_index,
            created_at: 0,
        }
    }
}

/// A single index change for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShift {
    pub id: Uuid,
    pub from: u32,
    pub to: u32,
}

/// The outcome of moving one entry into another scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Index the entry takes in the destination scope
    pub index: u32,
    /// Shifts closing the gap in the source scope
    pub source_shifts: Vec<IndexShift>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("index {target} is outside 0..{len}")]
    InvalidIndex { target: i64, len: usize },
    #[error("entry {0} is not part of this scope")]
    UnknownEntry(Uuid),
}

/// Index assigned to a new entry appended to a scope of `len` entries.
pub fn append_index(len: usize) -> u32 {
    len as u32
}

/// Move `entry` to `target` within its scope.
///
/// `target` must lie in `0..n`; out-of-range values are rejected rather
/// than clamped. Moving an entry onto its own index yields no shifts.
pub fn reorder(
    siblings: &[Placement],
    entry: Uuid,
    target: i64,
) -> Result<Vec<IndexShift>, OrderError> {
    let current = find(siblings, entry)?;
    let len = siblings.len();
    if target < 0 || target as usize >= len {
        return Err(OrderError::InvalidIndex { target, len });
    }

    let old = current.order_index;
    let target = target as u32;
    if old == target {
        return Ok(Vec::new());
    }

    let mut shifts = Vec::new();
    for sibling in siblings {
        let at = sibling.order_index;
        if sibling.id == entry {
            shifts.push(IndexShift { id: entry, from: old, to: target });
        } else if old < target && at > old && at <= target {
            shifts.push(IndexShift { id: sibling.id, from: at, to: at - 1 });
        } else if old > target && at >= target && at < old {
            shifts.push(IndexShift { id: sibling.id, from: at, to: at + 1 });
        }
    }
    Ok(shifts)
}

/// Remove `entry` from its scope. The returned shifts close the gap; the
/// removed entry itself is not part of them.
pub fn remove(siblings: &[Placement], entry: Uuid) -> Result<Vec<IndexShift>, OrderError> {
    let removed = find(siblings, entry)?.order_index;
    Ok(siblings
        .iter()
        .filter(|s| s.id != entry && s.order_index > removed)
        .map(|s| IndexShift {
            id: s.id,
            from: s.order_index,
            to: s.order_index - 1,
        })
        .collect())
}

/// Move `entry` from `source` to the end of `destination`.
///
/// The destination count is taken before the entry arrives, so the entry
/// never counts itself.
pub fn relocate(
    source: &[Placement],
    destination: &[Placement],
    entry: Uuid,
) -> Result<Relocation, OrderError> {
    let source_shifts = remove(source, entry)?;
    let arriving = destination.iter().filter(|d| d.id != entry).count();
    Ok(Relocation {
        index: append_index(arriving),
        source_shifts,
    })
}

/// Append `entries` (keeping their relative order) after `destination_len`
/// existing entries.
pub fn append_all(destination_len: usize, entries: &[Placement]) -> Vec<IndexShift> {
    let mut ordered = entries.to_vec();
    sort_observed(&mut ordered);
    ordered
        .iter()
        .enumerate()
        .map(|(offset, p)| IndexShift {
            id: p.id,
            from: p.order_index,
            to: append_index(destination_len + offset),
        })
        .collect()
}

/// Whether the placements form exactly `0..n` with no duplicates.
pub fn is_contiguous(siblings: &[Placement]) -> bool {
    let mut seen = vec![false; siblings.len()];
    for sibling in siblings {
        match seen.get_mut(sibling.order_index as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// Re-sequence a scope by observed order: `(order_index, created_at, id)`.
///
/// Only entries whose index changes are returned, so running this on an
/// intact scope yields nothing.
pub fn compact(siblings: &[Placement]) -> Vec<IndexShift> {
    let mut ordered = siblings.to_vec();
    sort_observed(&mut ordered);
    let shifts: Vec<IndexShift> = ordered
        .iter()
        .enumerate()
        .filter(|(i, p)| p.order_index != *i as u32)
        .map(|(i, p)| IndexShift {
            id: p.id,
            from: p.order_index,
            to: i as u32,
        })
        .collect();
    if !shifts.is_empty() {
        log::trace!("compaction re-sequenced {} of {} entries", shifts.len(), siblings.len());
    }
    shifts
}

/// Apply shifts to a placement snapshot in place.
pub fn apply(siblings: &mut [Placement], shifts: &[IndexShift]) {
    for shift in shifts {
        if let Some(p) = siblings.iter_mut().find(|p| p.id == shift.id) {
            p.order_index = shift.to;
        }
    }
}

fn sort_observed(placements: &mut [Placement]) {
    placements.sort_by(|a, b| {
        a.order_index
            .cmp(&b.order_index)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

fn find(siblings: &[Placement], entry: Uuid) -> Result<&Placement, OrderError> {
    siblings
        .iter()
        .find(|s| s.id == entry)
        .ok_or(OrderError::UnknownEntry(entry))
}
