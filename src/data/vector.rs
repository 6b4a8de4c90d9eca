//! Global (distributed) vectors.
//!
//! A [`GlobalVector`] stores the owned block `[xs, xe)` of a distributed
//! array. Values aimed at entries owned elsewhere are stashed and shipped to
//! their owners by the collective [`GlobalVector::assemble`]. Local (ghosted)
//! vectors are plain `Vec<V>` sized by the halo.

use std::ops::AddAssign;
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::Itertools;
use num_traits::Float;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::partition::{OwnedRange, OwnershipLayout};
use crate::algs::reduction::{ReduceOp, all_gather, all_reduce, all_reduce_scalar};
use crate::algs::scatter::InsertMode;
use crate::algs::wire::{Wire, WireIndex, WireStashHdr, cast_slice, decode_vec};
use crate::da_error::DaError;

pub const ASSEMBLY_HDR_TAG: CommTag = CommTag(0x3500);
pub const ASSEMBLY_IDX_TAG: CommTag = CommTag(0x3501);
pub const ASSEMBLY_VAL_TAG: CommTag = CommTag(0x3502);
pub const EXTREMUM_TAG: CommTag = CommTag(0x3520);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NormType {
    One,
    Two,
    Infinity,
}

fn mode_to_wire(mode: Option<InsertMode>) -> u32 {
    match mode {
        None => 0,
        Some(InsertMode::Insert) => 1,
        Some(InsertMode::Add) => 2,
    }
}

fn mode_from_wire(raw: u32) -> Option<InsertMode> {
    match raw {
        1 => Some(InsertMode::Insert),
        2 => Some(InsertMode::Add),
        _ => None,
    }
}

/// Owned block of a distributed vector plus a stash of off-process values.
#[derive(Clone, Debug)]
pub struct GlobalVector<V> {
    layout: Arc<OwnershipLayout>,
    rank: usize,
    values: Vec<V>,
    stash: Vec<(usize, V)>,
    pending: Option<InsertMode>,
}

impl<V: Wire + AddAssign> GlobalVector<V> {
    /// Zero-filled owned block of `rank`.
    pub fn new(layout: Arc<OwnershipLayout>, rank: usize) -> Self {
        let len = layout.range(rank).len;
        Self {
            layout,
            rank,
            values: vec![V::zeroed(); len],
            stash: Vec::new(),
            pending: None,
        }
    }

    pub fn owned_range(&self) -> OwnedRange {
        self.layout.range(self.rank)
    }

    /// Global length `M·w`.
    pub fn global_len(&self) -> usize {
        self.layout.total()
    }

    /// Length of the owned block.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[V] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [V] {
        &mut self.values
    }

    /// Value at global index `g`, if owned here.
    pub fn get(&self, g: usize) -> Option<V> {
        let owned = self.owned_range();
        owned.contains(g).then(|| self.values[g - owned.start])
    }

    /// Number of stashed off-process entries awaiting [`assemble`](Self::assemble).
    pub fn stash_len(&self) -> usize {
        self.stash.len()
    }

    /// Set entries by global index. Owned entries change immediately; the rest
    /// are stashed. Insert and add must not be mixed between assemblies.
    pub fn set_values(
        &mut self,
        indices: &[usize],
        values: &[V],
        mode: InsertMode,
    ) -> Result<(), DaError> {
        if indices.len() != values.len() {
            return Err(DaError::ArgumentOutOfRange(format!(
                "{} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        if self.pending.is_some_and(|m| m != mode) {
            return Err(DaError::InsertModeConflict);
        }
        let total = self.global_len();
        if let Some(&bad) = indices.iter().find(|&&g| g >= total) {
            return Err(DaError::IndexOutOfRange {
                index: bad,
                len: total,
            });
        }
        self.pending = Some(mode);
        let owned = self.owned_range();
        for (&g, &v) in indices.iter().zip(values) {
            if owned.contains(g) {
                mode.apply(&mut self.values[g - owned.start], v);
            } else {
                self.stash.push((g, v));
            }
        }
        Ok(())
    }

    /// Ship stashed values to their owners and apply incoming ones.
    ///
    /// Collective: every rank must call it, stash or not. Incoming entries are
    /// applied in sender rank order, each sender's entries in the order they
    /// were set.
    pub fn assemble<C: Communicator>(&mut self, comm: &C) -> Result<(), DaError> {
        let (me, size) = (comm.rank(), comm.size());
        let mode = self.pending.take();
        let mut outgoing: HashMap<usize, (Vec<WireIndex>, Vec<V>)> = HashMap::new();
        for (g, v) in self.stash.drain(..) {
            if let Some(owner) = self.layout.owner_of(g) {
                let entry = outgoing.entry(owner).or_default();
                entry.0.push(WireIndex::of(g));
                entry.1.push(v);
            }
        }
        let peers: Vec<usize> = (0..size).filter(|&p| p != me).collect();

        // 1) headers: count + mode, to every peer
        let mut hdr_recvs = Vec::with_capacity(peers.len());
        for &peer in &peers {
            let mut scratch = [0u8; std::mem::size_of::<WireStashHdr>()];
            hdr_recvs.push((peer, comm.irecv(peer, ASSEMBLY_HDR_TAG.as_u16(), &mut scratch)));
        }
        let mut pending_sends = Vec::with_capacity(3 * peers.len());
        for &peer in &peers {
            let count = outgoing.get(&peer).map_or(0, |(idx, _)| idx.len());
            let hdr = WireStashHdr::new(count, mode_to_wire(mode));
            pending_sends.push(comm.isend(
                peer,
                ASSEMBLY_HDR_TAG.as_u16(),
                cast_slice(std::slice::from_ref(&hdr)),
            ));
        }
        let mut maybe_err = None;
        let mut incoming_hdrs = Vec::with_capacity(peers.len());
        for (peer, h) in hdr_recvs {
            match h.wait().as_deref().and_then(decode_vec::<WireStashHdr>) {
                Some(hdr) if hdr.len() == 1 => incoming_hdrs.push((peer, hdr[0])),
                _ if maybe_err.is_none() => {
                    maybe_err = Some(DaError::CommError {
                        neighbor: peer,
                        message: "malformed assembly header".into(),
                    });
                }
                _ => {}
            }
        }
        if let Some(err) = maybe_err {
            for send in pending_sends {
                let _ = send.wait();
            }
            return Err(err);
        }

        // 2) payloads, only between pairs with a non-zero count
        let mut data_recvs = Vec::new();
        for &(peer, hdr) in &incoming_hdrs {
            if hdr.count() == 0 {
                continue;
            }
            let mut idx_scratch = vec![0u8; hdr.count() * std::mem::size_of::<WireIndex>()];
            let mut val_scratch = vec![0u8; hdr.count() * std::mem::size_of::<V>()];
            let hi = comm.irecv(peer, ASSEMBLY_IDX_TAG.as_u16(), &mut idx_scratch);
            let hv = comm.irecv(peer, ASSEMBLY_VAL_TAG.as_u16(), &mut val_scratch);
            data_recvs.push((peer, hdr, hi, hv));
        }
        for (&peer, (idx, vals)) in outgoing.iter().sorted_by_key(|(p, _)| **p) {
            pending_sends.push(comm.isend(peer, ASSEMBLY_IDX_TAG.as_u16(), cast_slice(idx)));
            pending_sends.push(comm.isend(peer, ASSEMBLY_VAL_TAG.as_u16(), cast_slice(vals)));
        }

        let owned = self.owned_range();
        let mut applied_mode = mode;
        for (peer, hdr, hi, hv) in data_recvs {
            let idx = hi.wait().as_deref().and_then(decode_vec::<WireIndex>);
            let vals = hv.wait().as_deref().and_then(decode_vec::<V>);
            if maybe_err.is_some() {
                continue;
            }
            let (Some(idx), Some(vals)) = (idx, vals) else {
                maybe_err = Some(DaError::CommError {
                    neighbor: peer,
                    message: "failed to receive stashed values".into(),
                });
                continue;
            };
            if idx.len() != hdr.count() || vals.len() != hdr.count() {
                maybe_err = Some(DaError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: hdr.count(),
                    got: idx.len().min(vals.len()),
                });
                continue;
            }
            let Some(peer_mode) = mode_from_wire(hdr.mode()) else {
                maybe_err = Some(DaError::CommError {
                    neighbor: peer,
                    message: format!("unknown insert mode {}", hdr.mode()),
                });
                continue;
            };
            if applied_mode.is_some_and(|m| m != peer_mode) {
                maybe_err = Some(DaError::InsertModeConflict);
                continue;
            }
            applied_mode = Some(peer_mode);
            for (w, v) in idx.iter().zip(vals) {
                let g = w.get();
                if !owned.contains(g) {
                    maybe_err = Some(DaError::IndexOutOfRange {
                        index: g,
                        len: self.global_len(),
                    });
                    break;
                }
                peer_mode.apply(&mut self.values[g - owned.start], v);
            }
        }
        for send in pending_sends {
            let _ = send.wait();
        }
        log::trace!("rank {me}: assembled vector, mode {applied_mode:?}");
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<V: Wire + AddAssign + Float> GlobalVector<V> {
    /// Global norm; collective.
    pub fn norm<C: Communicator>(&self, comm: &C, kind: NormType) -> Result<f64, DaError> {
        let local = local_norm(&self.values, kind);
        match kind {
            NormType::One => all_reduce_scalar(comm, local, ReduceOp::Sum),
            NormType::Two => Ok(all_reduce_scalar(comm, local, ReduceOp::Sum)?.sqrt()),
            NormType::Infinity => all_reduce_scalar(comm, local, ReduceOp::Max),
        }
    }

    /// Global dot product with a vector of the same layout; collective.
    pub fn dot<C: Communicator>(&self, comm: &C, other: &GlobalVector<V>) -> Result<f64, DaError> {
        if other.len() != self.len() {
            return Err(DaError::VectorLengthMismatch {
                expected: self.len(),
                got: other.len(),
            });
        }
        let local: f64 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| to_f64(*a) * to_f64(*b))
            .sum();
        all_reduce_scalar(comm, local, ReduceOp::Sum)
    }

    /// 1-norm and 2-norm with a single reduction; collective.
    pub fn norm_1_and_2<C: Communicator>(&self, comm: &C) -> Result<(f64, f64), DaError> {
        let local = [
            local_norm(&self.values, NormType::One),
            local_norm(&self.values, NormType::Two),
        ];
        let sums = all_reduce(comm, &local, ReduceOp::Sum)?;
        Ok((sums[0], sums[1].sqrt()))
    }

    /// Dot products with each of `others` with a single reduction; collective.
    pub fn mdot<C: Communicator>(
        &self,
        comm: &C,
        others: &[&GlobalVector<V>],
    ) -> Result<Vec<f64>, DaError> {
        if let Some(bad) = others.iter().find(|o| o.len() != self.len()) {
            return Err(DaError::VectorLengthMismatch {
                expected: self.len(),
                got: bad.len(),
            });
        }
        let local: Vec<f64> = others
            .iter()
            .map(|o| {
                self.values
                    .iter()
                    .zip(&o.values)
                    .map(|(a, b)| to_f64(*a) * to_f64(*b))
                    .sum()
            })
            .collect();
        all_reduce(comm, &local, ReduceOp::Sum)
    }

    /// Largest entry as `(global index, value)`; ties go to the lowest index.
    /// Collective.
    pub fn max<C: Communicator>(&self, comm: &C) -> Result<(usize, f64), DaError> {
        self.extremum(comm, ReduceOp::Max)
    }

    /// Smallest entry as `(global index, value)`; ties go to the lowest index.
    /// Collective.
    pub fn min<C: Communicator>(&self, comm: &C) -> Result<(usize, f64), DaError> {
        self.extremum(comm, ReduceOp::Min)
    }

    fn extremum<C: Communicator>(&self, comm: &C, op: ReduceOp) -> Result<(usize, f64), DaError> {
        let local = self
            .values
            .iter()
            .map(|&v| to_f64(v))
            .fold(op.identity(), |acc, x| op.fold(acc, x));
        let value = all_reduce_scalar(comm, local, op)?;

        // lowest global index holding `value`; usize::MAX when none is owned here
        let xs = self.owned_range().start;
        let mine = self
            .values
            .iter()
            .position(|&v| to_f64(v) == value)
            .map_or(usize::MAX, |i| xs + i);
        let index = all_gather(comm, EXTREMUM_TAG, &[WireIndex::of(mine)])?
            .iter()
            .flatten()
            .map(WireIndex::get)
            .min()
            .filter(|&g| g != usize::MAX)
            .ok_or_else(|| {
                DaError::ArgumentOutOfRange("vector has no comparable entries".into())
            })?;
        Ok((index, value))
    }
}

fn to_f64<V: Float>(v: V) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

/// Partial norm of the owned block (squared for the 2-norm).
#[cfg(not(feature = "rayon"))]
fn local_norm<V: Float>(values: &[V], kind: NormType) -> f64 {
    let it = values.iter().map(|&v| to_f64(v).abs());
    match kind {
        NormType::One => it.sum(),
        NormType::Two => it.map(|a| a * a).sum(),
        NormType::Infinity => it.fold(0.0, f64::max),
    }
}

#[cfg(feature = "rayon")]
fn local_norm<V: Float + Send + Sync>(values: &[V], kind: NormType) -> f64 {
    use rayon::prelude::*;
    let it = values.par_iter().map(|&v| to_f64(v).abs());
    match kind {
        NormType::One => it.sum(),
        NormType::Two => it.map(|a| a * a).sum(),
        NormType::Infinity => it.reduce(|| 0.0, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::partition::NodesAtStart;
    use crate::data::grid::{GridSpec, Periodicity};

    fn layout(m: usize, size: usize) -> Arc<OwnershipLayout> {
        let spec = GridSpec::new(m, 1, 0, Periodicity::Clamped).unwrap();
        Arc::new(OwnershipLayout::new(&spec, size, &NodesAtStart).unwrap())
    }

    #[test]
    fn owned_values_apply_immediately() {
        let mut v = GlobalVector::<f64>::new(layout(6, 2), 1);
        assert_eq!(v.owned_range(), OwnedRange::new(3, 3));
        v.set_values(&[3, 5], &[1.0, 2.0], InsertMode::Insert).unwrap();
        assert_eq!(v.as_slice(), &[1.0, 0.0, 2.0]);
        v.set_values(&[0], &[9.0], InsertMode::Insert).unwrap();
        assert_eq!(v.stash_len(), 1);
        assert_eq!(v.get(0), None);
        assert_eq!(v.get(5), Some(2.0));
    }

    #[test]
    fn mixing_modes_is_rejected() {
        let mut v = GlobalVector::<f64>::new(layout(4, 1), 0);
        v.set_values(&[0], &[1.0], InsertMode::Add).unwrap();
        assert_eq!(
            v.set_values(&[1], &[1.0], InsertMode::Insert),
            Err(DaError::InsertModeConflict)
        );
        v.assemble(&NoComm).unwrap();
        v.set_values(&[1], &[1.0], InsertMode::Insert).unwrap();
    }

    #[test]
    fn bad_indices_and_lengths() {
        let mut v = GlobalVector::<f64>::new(layout(4, 1), 0);
        assert_eq!(
            v.set_values(&[4], &[1.0], InsertMode::Insert),
            Err(DaError::IndexOutOfRange { index: 4, len: 4 })
        );
        assert!(matches!(
            v.set_values(&[1, 2], &[1.0], InsertMode::Insert),
            Err(DaError::ArgumentOutOfRange(_))
        ));
    }

    #[test]
    fn serial_extrema_prefer_lowest_index() {
        let mut v = GlobalVector::<f64>::new(layout(4, 1), 0);
        v.as_mut_slice().copy_from_slice(&[2.0, 5.0, 5.0, -1.0]);
        assert_eq!(v.max(&NoComm).unwrap(), (1, 5.0));
        assert_eq!(v.min(&NoComm).unwrap(), (3, -1.0));
        v.as_mut_slice().fill(f64::NAN);
        assert!(matches!(
            v.max(&NoComm),
            Err(DaError::ArgumentOutOfRange(_))
        ));
    }

    #[test]
    fn serial_norms() {
        let mut v = GlobalVector::<f64>::new(layout(3, 1), 0);
        v.as_mut_slice().copy_from_slice(&[3.0, -4.0, 0.0]);
        assert_eq!(v.norm(&NoComm, NormType::One).unwrap(), 7.0);
        assert_eq!(v.norm(&NoComm, NormType::Two).unwrap(), 5.0);
        assert_eq!(v.norm(&NoComm, NormType::Infinity).unwrap(), 4.0);
        assert_eq!(v.dot(&NoComm, &v).unwrap(), 25.0);
    }
}
