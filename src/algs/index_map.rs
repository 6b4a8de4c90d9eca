//! IndexMap: local (ghosted) position → global scalar index.
//!
//! Local storage is laid out as left ghosts, owned entries, right ghosts.
//! Periodic grids get a full-width halo on every rank with indices wrapped
//! modulo `M·w`; clamped grids get a shorter list at the physical ends.

use crate::algs::ghost::HaloRange;
use crate::algs::partition::OwnedRange;
use crate::da_error::DaError;
use crate::data::grid::Periodicity;

/// Read-only table of global indices, one per local slot.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexMap {
    indices: Vec<usize>,
    owned_offset: usize,
    owned_len: usize,
}

impl IndexMap {
    /// Enumerate the global index of every local slot.
    pub fn build(
        owned: OwnedRange,
        stencil: usize,
        total: usize,
        periodicity: Periodicity,
    ) -> Self {
        let (xs, xe) = (owned.start, owned.end());
        let mut indices = Vec::with_capacity(owned.len + 2 * stencil);
        let left;
        match periodicity {
            Periodicity::Periodic => {
                left = stencil;
                indices.extend((0..stencil).map(|i| {
                    if xs + i >= stencil {
                        xs + i - stencil
                    } else {
                        xs + i + total - stencil
                    }
                }));
                indices.extend(owned.as_range());
                indices.extend((0..stencil).map(|i| {
                    if xe + i < total {
                        xe + i
                    } else {
                        xe + i - total
                    }
                }));
            }
            Periodicity::Clamped => {
                left = stencil.min(xs);
                indices.extend(xs - left..xs);
                indices.extend(owned.as_range());
                let right = stencil.min(total - xe);
                indices.extend(xe..xe + right);
            }
        }
        Self {
            indices,
            owned_offset: left,
            owned_len: owned.len,
        }
    }

    /// Build the map matching a previously computed halo.
    pub fn for_halo(
        owned: OwnedRange,
        halo: &HaloRange,
        stencil: usize,
        total: usize,
        periodicity: Periodicity,
    ) -> Self {
        let map = Self::build(owned, stencil, total, periodicity);
        debug_assert_eq!(map.len(), halo.len(), "index map disagrees with halo");
        map
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    /// Local position of the first owned entry (`xs − Xs`).
    pub fn owned_offset(&self) -> usize {
        self.owned_offset
    }

    pub fn owned_slots(&self) -> std::ops::Range<usize> {
        self.owned_offset..self.owned_offset + self.owned_len
    }

    /// Global index stored at local position `local`.
    pub fn global(&self, local: usize) -> Result<usize, DaError> {
        self.indices
            .get(local)
            .copied()
            .ok_or(DaError::IndexOutOfRange {
                index: local,
                len: self.indices.len(),
            })
    }

    /// First local position holding global index `g`, if any.
    pub fn local_of(&self, g: usize) -> Option<usize> {
        let owned = self.owned_slots();
        if let Some(pos) = self.indices[owned.clone()].iter().position(|&i| i == g) {
            return Some(owned.start + pos);
        }
        self.indices.iter().position(|&i| i == g)
    }

    /// `(local position, global index)` for every ghost slot.
    pub fn ghost_entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let owned = self.owned_slots();
        self.indices
            .iter()
            .copied()
            .enumerate()
            .filter(move |(p, _)| !owned.contains(p))
    }
}
