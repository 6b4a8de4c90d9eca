//! Application ordering: partitioned index ↔ natural (single-process) index.
//!
//! In one dimension each rank's owned block is already a contiguous block of
//! the natural ordering, so the map is the identity. It is still stored as
//! explicit segments so callers can treat it like any other bijection.

use crate::algs::partition::OwnershipLayout;
use crate::da_error::DaError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct Segment {
    partitioned: usize,
    natural: usize,
    len: usize,
}

/// Bijection between partitioned and natural scalar indices over `[0, M·w)`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OrderingMap {
    /// Sorted by `partitioned`.
    by_partitioned: Vec<Segment>,
    /// Sorted by `natural`.
    by_natural: Vec<Segment>,
    total: usize,
}

impl OrderingMap {
    /// One segment per rank: its owned block maps onto the same natural block.
    pub fn from_layout(layout: &OwnershipLayout) -> Self {
        let by_partitioned: Vec<Segment> = layout
            .ranges()
            .filter(|r| r.len > 0)
            .map(|r| Segment {
                partitioned: r.start,
                natural: r.start,
                len: r.len,
            })
            .collect();
        let mut by_natural = by_partitioned.clone();
        by_natural.sort_unstable_by_key(|s| s.natural);
        Self {
            by_partitioned,
            by_natural,
            total: layout.total(),
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// True when every segment maps onto itself.
    pub fn is_identity(&self) -> bool {
        self.by_partitioned.iter().all(|s| s.partitioned == s.natural)
    }

    fn lookup(
        segments: &[Segment],
        key: impl Fn(&Segment) -> usize,
        idx: usize,
        total: usize,
    ) -> Result<&Segment, DaError> {
        let i = segments.partition_point(|s| key(s) <= idx);
        i.checked_sub(1)
            .map(|i| &segments[i])
            .filter(|s| idx < key(*s) + s.len)
            .ok_or(DaError::IndexOutOfRange { index: idx, len: total })
    }

    /// Natural index of partitioned index `idx`.
    pub fn natural_of(&self, idx: usize) -> Result<usize, DaError> {
        let seg = Self::lookup(&self.by_partitioned, |s| s.partitioned, idx, self.total)?;
        Ok(seg.natural + (idx - seg.partitioned))
    }

    /// Partitioned index of natural index `idx`.
    pub fn partitioned_of(&self, idx: usize) -> Result<usize, DaError> {
        let seg = Self::lookup(&self.by_natural, |s| s.natural, idx, self.total)?;
        Ok(seg.partitioned + (idx - seg.natural))
    }

    /// Rewrite partitioned indices in place as natural indices.
    pub fn to_natural(&self, indices: &mut [usize]) -> Result<(), DaError> {
        for idx in indices.iter_mut() {
            *idx = self.natural_of(*idx)?;
        }
        Ok(())
    }

    /// Rewrite natural indices in place as partitioned indices.
    pub fn to_partitioned(&self, indices: &mut [usize]) -> Result<(), DaError> {
        for idx in indices.iter_mut() {
            *idx = self.partitioned_of(*idx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::partition::NodesAtEnd;
    use crate::data::grid::{GridSpec, Periodicity};

    #[test]
    fn one_dimensional_ordering_is_identity() {
        let spec = GridSpec::new(7, 2, 1, Periodicity::Clamped).unwrap();
        let layout = OwnershipLayout::new(&spec, 3, &NodesAtEnd).unwrap();
        let ao = OrderingMap::from_layout(&layout);
        assert!(ao.is_identity());
        assert_eq!(ao.len(), 14);
        let mut idx = vec![0, 5, 13, 8];
        ao.to_natural(&mut idx).unwrap();
        assert_eq!(idx, vec![0, 5, 13, 8]);
        ao.to_partitioned(&mut idx).unwrap();
        assert_eq!(idx, vec![0, 5, 13, 8]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let spec = GridSpec::new(4, 1, 0, Periodicity::Clamped).unwrap();
        let layout = OwnershipLayout::new(&spec, 2, &NodesAtEnd).unwrap();
        let ao = OrderingMap::from_layout(&layout);
        assert_eq!(
            ao.natural_of(4),
            Err(DaError::IndexOutOfRange { index: 4, len: 4 })
        );
        assert!(ao.to_partitioned(&mut [1, 9]).is_err());
    }
}
