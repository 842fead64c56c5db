//! Folio allocation over the loaded CAF ranges.
//!
//! The allocator is deliberately stateless: every call re-reads the CAF
//! directory and recomputes the next candidate from the persisted maximum.
//! The backing CAF is threaded through [`AllocationResult`] rather than any
//! shared process state, so concurrent allocations cannot observe each
//! other's selection.
//!
//! Two concurrent callers may still compute the same candidate before
//! either persists its record (read-then-write race, no mutual exclusion).
//! The authority's own duplicate-folio rejection (`RSC`) plus local
//! renumbering is the backstop, not a database lock.

use std::path::{Path, PathBuf};

use crate::caf::{self, CafRange};
use crate::error::Result;

/// Outcome of one allocation attempt. Produced fresh, never cached.
#[derive(Debug, Clone)]
pub struct AllocationResult {
    /// The folio to assign, or `None` when no loaded range covers the next
    /// candidate (no CAF files, a gap below the next range, or true
    /// exhaustion — callers treat all three identically).
    pub assigned_folio: Option<u64>,
    /// The range backing `assigned_folio`.
    pub backing_range: Option<CafRange>,
    /// Folios still assignable at or above the next candidate, summed
    /// across all ranges. May be positive even when `assigned_folio` is
    /// `None` (a gap between the last consumed number and the next range).
    pub remaining_capacity: u64,
}

impl AllocationResult {
    fn exhausted() -> Self {
        Self {
            assigned_folio: None,
            backing_range: None,
            remaining_capacity: 0,
        }
    }
}

/// Computes the allocation for `last_used_folio` against already-loaded
/// ranges. Pure; the disk-backed entry point is [`FolioAllocator::allocate`].
#[must_use]
pub fn allocate_from(last_used_folio: u64, ranges: Vec<CafRange>) -> AllocationResult {
    if ranges.is_empty() {
        return AllocationResult::exhausted();
    }

    let next_candidate = last_used_folio + 1;
    let mut remaining_capacity = 0u64;
    let mut backing_range = None;

    // Ranges arrive ascending by `from`; the first range containing the
    // candidate wins, which keeps overlapping certificates deterministic.
    for range in ranges {
        if range.to > last_used_folio {
            let effective_from = range.from.max(next_candidate);
            remaining_capacity += range.to - effective_from + 1;
        }
        if backing_range.is_none() && range.contains(next_candidate) {
            backing_range = Some(range);
        }
    }

    let assigned_folio = backing_range.as_ref().map(|_| next_candidate);
    AllocationResult {
        assigned_folio,
        backing_range,
        remaining_capacity,
    }
}

/// Extracts the numeric prefix of a stored folio string.
///
/// Real folios are plain digits; fictitious and renumbered folios are
/// compound (`id-suffix`). Sequencing takes the digits before the first
/// separator, so a renumbered `151-482910` still consumes folio 151.
#[must_use]
pub fn numeric_prefix(folio: &str) -> Option<u64> {
    let digits = folio.split('-').next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Disk-backed folio allocator over a CAF directory.
#[derive(Debug, Clone)]
pub struct FolioAllocator {
    caf_directory: PathBuf,
}

impl FolioAllocator {
    /// Creates an allocator reading ranges from `caf_directory`.
    #[must_use]
    pub fn new(caf_directory: impl Into<PathBuf>) -> Self {
        Self {
            caf_directory: caf_directory.into(),
        }
    }

    /// Returns the CAF directory this allocator reads.
    #[must_use]
    pub fn caf_directory(&self) -> &Path {
        &self.caf_directory
    }

    /// Computes the next folio to assign given the last used folio.
    ///
    /// Re-reads the CAF directory on every call.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] when the CAF directory
    /// cannot be listed.
    pub fn allocate(&self, last_used_folio: u64) -> Result<AllocationResult> {
        let ranges = caf::load_ranges(&self.caf_directory)?;
        let result = allocate_from(last_used_folio, ranges);
        tracing::debug!(
            last_used_folio,
            assigned = ?result.assigned_folio,
            remaining = result.remaining_capacity,
            caf = result.backing_range.as_ref().map(|r| r.file_id.as_str()),
            "folio allocation computed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(file_id: &str, from: u64, to: u64) -> CafRange {
        CafRange {
            file_id: file_id.to_string(),
            path: PathBuf::from(format!("/caf/{file_id}")),
            from,
            to,
            resolution: None,
        }
    }

    #[test]
    fn empty_ranges_mean_exhaustion() {
        let result = allocate_from(42, Vec::new());
        assert_eq!(result.assigned_folio, None);
        assert_eq!(result.remaining_capacity, 0);
        assert!(result.backing_range.is_none());
    }

    #[test]
    fn single_range_mid_consumption() {
        // One CAF [100,199], last used 150: next is 151 with 49 left.
        let result = allocate_from(150, vec![range("a.xml", 100, 199)]);
        assert_eq!(result.assigned_folio, Some(151));
        assert_eq!(result.remaining_capacity, 49);
        assert_eq!(result.backing_range.unwrap().file_id, "a.xml");
    }

    #[test]
    fn gap_between_ranges_yields_no_folio_but_positive_capacity() {
        // [1,100] consumed past its end, [150,200] not yet reachable.
        let ranges = vec![range("a.xml", 1, 100), range("b.xml", 150, 200)];
        let result = allocate_from(120, ranges);
        assert_eq!(result.assigned_folio, None);
        assert!(result.backing_range.is_none());
        assert_eq!(result.remaining_capacity, 51);
    }

    #[test]
    fn capacity_never_counts_consumed_numbers() {
        // last used inside the second range: first range contributes nothing.
        let ranges = vec![range("a.xml", 1, 100), range("b.xml", 150, 200)];
        let result = allocate_from(160, ranges);
        assert_eq!(result.assigned_folio, Some(161));
        assert_eq!(result.remaining_capacity, 40);
    }

    #[test]
    fn fully_consumed_ranges_are_exhausted() {
        let result = allocate_from(200, vec![range("a.xml", 100, 200)]);
        assert_eq!(result.assigned_folio, None);
        assert_eq!(result.remaining_capacity, 0);
    }

    #[test]
    fn fresh_range_starts_at_its_from() {
        let result = allocate_from(0, vec![range("a.xml", 100, 199)]);
        // Candidate 1 is below the range: gap, not an assignment.
        assert_eq!(result.assigned_folio, None);
        assert_eq!(result.remaining_capacity, 100);
    }

    #[test]
    fn overlapping_ranges_pick_lowest_from() {
        let ranges = vec![range("low.xml", 100, 300), range("high.xml", 150, 400)];
        let result = allocate_from(199, ranges);
        assert_eq!(result.assigned_folio, Some(200));
        assert_eq!(result.backing_range.unwrap().file_id, "low.xml");
        // low: 300-200+1 = 101; high: 400-200+1 = 201.
        assert_eq!(result.remaining_capacity, 302);
    }

    #[test]
    fn assigned_folio_is_always_inside_a_range_and_above_last_used() {
        let ranges = vec![range("a.xml", 10, 20), range("b.xml", 30, 40)];
        for last_used in 0..50 {
            let result = allocate_from(last_used, ranges.clone());
            if let Some(folio) = result.assigned_folio {
                assert!(folio > last_used);
                assert!(ranges.iter().any(|r| r.contains(folio)));
            }
        }
    }

    #[test]
    fn capacity_matches_per_range_formula() {
        let ranges = vec![range("a.xml", 10, 20), range("b.xml", 30, 40)];
        for last_used in 0..50u64 {
            let expected: u64 = ranges
                .iter()
                .map(|r| {
                    let lo = r.from.max(last_used + 1);
                    if r.to >= lo { r.to - lo + 1 } else { 0 }
                })
                .sum();
            let result = allocate_from(last_used, ranges.clone());
            assert_eq!(result.remaining_capacity, expected, "last_used={last_used}");
        }
    }

    #[test]
    fn numeric_prefix_handles_plain_and_compound_folios() {
        assert_eq!(numeric_prefix("151"), Some(151));
        assert_eq!(numeric_prefix("151-482910"), Some(151));
        assert_eq!(numeric_prefix("007-1234"), Some(7));
        assert_eq!(numeric_prefix("-123"), None);
        assert_eq!(numeric_prefix("abc"), None);
        assert_eq!(numeric_prefix(""), None);
    }

    #[test]
    fn allocator_reads_directory_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = FolioAllocator::new(dir.path());

        let result = allocator.allocate(0).unwrap();
        assert_eq!(result.remaining_capacity, 0);

        std::fs::write(
            dir.path().join("caf_1.xml"),
            crate::caf::test_support::caf_body(1, 50),
        )
        .unwrap();

        let result = allocator.allocate(0).unwrap();
        assert_eq!(result.assigned_folio, Some(1));
        assert_eq!(result.remaining_capacity, 50);
    }
}
