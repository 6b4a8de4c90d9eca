//! Ghost (halo) range around an owned range.

use crate::algs::partition::OwnedRange;
use crate::data::grid::Periodicity;

/// Extended range `[start, end)` in scalar units.
///
/// For periodic grids `start` may be negative and `end` may exceed `M·w`;
/// the index map resolves those positions by wrapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HaloRange {
    pub start: isize,
    pub end: isize,
    /// Offset of the first owned entry inside local storage (`xs − Xs`).
    owned_offset: usize,
    owned_len: usize,
}

impl HaloRange {
    /// Haloed range of `owned` for a stencil of `stencil` scalar entries in a
    /// grid of `total` (`M·w`) entries.
    pub fn compute(
        owned: OwnedRange,
        stencil: usize,
        total: usize,
        periodicity: Periodicity,
    ) -> Self {
        let xs = owned.start as isize;
        let xe = owned.end() as isize;
        let s = stencil as isize;
        let (start, end) = match periodicity {
            Periodicity::Periodic => (xs - s, xe + s),
            Periodicity::Clamped => ((xs - s).max(0), (xe + s).min(total as isize)),
        };
        Self {
            start,
            end,
            owned_offset: (xs - start) as usize,
            owned_len: owned.len,
        }
    }

    /// Number of local slots, `Xe − Xs`.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Number of ghost slots before the owned block.
    pub fn left_width(&self) -> usize {
        self.owned_offset
    }

    /// Number of ghost slots after the owned block.
    pub fn right_width(&self) -> usize {
        self.len() - self.owned_offset - self.owned_len
    }

    /// Local positions holding owned entries.
    pub fn owned_slots(&self) -> std::ops::Range<usize> {
        self.owned_offset..self.owned_offset + self.owned_len
    }

    /// Whether this halo (taken modulo `period` when periodic) touches `owned`.
    pub fn intersects(&self, owned: OwnedRange, period: Option<usize>) -> bool {
        let (a, b) = (owned.start as isize, owned.end() as isize);
        let overlaps = |shift: isize| self.start < b + shift && a + shift < self.end;
        match period {
            Some(p) => {
                let p = p as isize;
                overlaps(-p) || overlaps(0) || overlaps(p)
            }
            None => overlaps(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_first_rank_has_no_left_ghost() {
        let h = HaloRange::compute(OwnedRange::new(0, 5), 1, 10, Periodicity::Clamped);
        assert_eq!((h.start, h.end), (0, 6));
        assert_eq!((h.left_width(), h.right_width()), (0, 1));
        assert_eq!(h.owned_slots(), 0..5);
    }

    #[test]
    fn periodic_first_rank_goes_negative() {
        let h = HaloRange::compute(OwnedRange::new(0, 5), 1, 10, Periodicity::Periodic);
        assert_eq!((h.start, h.end), (-1, 6));
        assert_eq!(h.len(), 7);
        assert_eq!(h.owned_slots(), 1..6);
    }

    #[test]
    fn clamped_last_rank_is_clipped() {
        let h = HaloRange::compute(OwnedRange::new(5, 5), 2, 10, Periodicity::Clamped);
        assert_eq!((h.start, h.end), (3, 10));
        assert_eq!((h.left_width(), h.right_width()), (2, 0));
    }

    #[test]
    fn wrapped_intersection() {
        let h = HaloRange::compute(OwnedRange::new(0, 5), 1, 10, Periodicity::Periodic);
        assert!(h.intersects(OwnedRange::new(5, 5), Some(10)));
        let clamped = HaloRange::compute(OwnedRange::new(0, 3), 1, 10, Periodicity::Clamped);
        assert!(!clamped.intersects(OwnedRange::new(7, 3), None));
        assert!(clamped.intersects(OwnedRange::new(3, 4), None));
    }
}
