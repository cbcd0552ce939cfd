//! Weighted slot assignment.
//!
//! Grounded on the `s_i = Σ_{j<i} w_j`, player `i` owns `[s_i, s_i + w_i)`
//! contiguous-range construction used by `aptos-dkg`'s `WeightedConfig`
//! (`das/weighted_protocol.rs`).

use crate::error::SlotAssignError;

/// An inclusive `[start, end]` slot range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u32,
    pub end: u32,
}

impl SlotRange {
    pub fn count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, slot: u32) -> bool {
        slot >= self.start && slot <= self.end
    }
}

/// Deterministically assigns `total_slots` slots to participants in
/// proportion to `weights`, in input order.
///
/// For every participant but the last, `slots_i = floor(weight_i /
/// total_weight * total_slots)`. The last participant absorbs the rounding
/// remainder: `slots_last = total_slots - Σ slots_i`. Fails if the total
/// weight is zero or any computed share (including the last participant's)
/// is not strictly positive.
pub fn assign_slots(weights: &[f64], total_slots: u32) -> Result<Vec<SlotRange>, SlotAssignError> {
    if weights.is_empty() {
        return Err(SlotAssignError::NoParticipants);
    }
    let total_weight: f64 = weights.iter().sum();
    if total_weight <= 0.0 {
        return Err(SlotAssignError::ZeroTotalWeight);
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut assigned: u32 = 0;
    for (i, &w) in weights[..weights.len() - 1].iter().enumerate() {
        let share = ((w / total_weight) * total_slots as f64).floor() as i64;
        if share <= 0 {
            return Err(SlotAssignError::NonPositiveShare(i));
        }
        assigned += share as u32;
        shares.push(share as u32);
    }
    let last_index = weights.len() - 1;
    let last_share = total_slots as i64 - assigned as i64;
    if last_share <= 0 {
        return Err(SlotAssignError::NonPositiveShare(last_index));
    }
    shares.push(last_share as u32);

    let mut ranges = Vec::with_capacity(shares.len());
    let mut cursor = 0u32;
    for share in shares {
        let start = cursor;
        let end = cursor + share - 1;
        ranges.push(SlotRange { start, end });
        cursor = end + 1;
    }
    Ok(ranges)
}

/// Checks the output invariants: contiguous, non-overlapping, covers
/// `[0, total_slots)` in order.
pub fn verify_partition(ranges: &[SlotRange], total_slots: u32) -> bool {
    if ranges.is_empty() {
        return total_slots == 0;
    }
    if ranges[0].start != 0 {
        return false;
    }
    for w in ranges.windows(2) {
        if w[1].start != w[0].end + 1 {
            return false;
        }
    }
    ranges.last().unwrap().end + 1 == total_slots
}
