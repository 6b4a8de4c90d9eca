//! Scatter plans: reusable data-movement contracts between vectors.
//!
//! A plan lists, for one rank,
//! - *self copies* `(src position, dst position)` served from local memory,
//! - *sends* `peer → src positions` this rank packs for each peer,
//! - *receives* `peer → dst positions` filled from each peer's message.
//!
//! Send and receive lists of a peer pair are built from the same index map
//! walked in the same (receiver-local) order, so no index metadata travels on
//! the wire: only packed values.
//!
//! Plans run in two phases. [`ScatterPlan::begin`] packs every outgoing value,
//! posts receives and issues sends; [`ScatterInFlight::end`] waits for all
//! handles and writes into the destination. Each invocation uses a fresh tag,
//! so the messages of one invocation can never be matched by the next.
//!
//! Scatter tags live in `[0x4000, 0x8000)`, below the tag bound every MPI
//! implementation guarantees. Bits 8..14 hold the plan's context (one per
//! distributed array), bits 6..8 the plan kind and bits 0..6 the epoch.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::ghost::HaloRange;
use crate::algs::index_map::IndexMap;
use crate::algs::partition::OwnershipLayout;
use crate::algs::wire::{Wire, cast_slice, decode_vec};
use crate::da_error::DaError;
use crate::data::grid::GridSpec;

const SCATTER_TAG_BASE: u16 = 0x4000;
const EPOCH_WINDOW: u16 = 64;
const CONTEXT_WINDOW: u16 = 64;

/// How incoming values combine with the destination.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Overwrite the destination.
    #[default]
    Insert,
    /// Accumulate into the destination.
    Add,
}

impl InsertMode {
    #[inline]
    pub fn apply<V: Copy + AddAssign>(self, slot: &mut V, value: V) {
        match self {
            InsertMode::Insert => *slot = value,
            InsertMode::Add => *slot += value,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScatterKind {
    /// Owned block of a local vector → global vector.
    LocalToGlobal,
    /// Global vector → every slot of a local vector, ghosts included.
    GlobalToLocal,
    /// Owned blocks of local vectors → every slot of a local vector.
    LocalToLocal,
    /// Every slot of a local vector → owners in the global vector.
    GhostAccumulate,
}

impl ScatterKind {
    fn code(self) -> u16 {
        match self {
            ScatterKind::LocalToGlobal => 0,
            ScatterKind::GlobalToLocal => 1,
            ScatterKind::LocalToLocal => 2,
            ScatterKind::GhostAccumulate => 3,
        }
    }

    /// First tag of this kind's epoch window in `context`.
    pub fn base_tag(self, context: u16) -> CommTag {
        CommTag(SCATTER_TAG_BASE | ((context % CONTEXT_WINDOW) << 8) | (self.code() << 6))
    }
}

/// Immutable communication plan for one rank.
#[derive(Debug)]
pub struct ScatterPlan {
    kind: ScatterKind,
    src_len: usize,
    dst_len: usize,
    self_copies: Vec<(usize, usize)>,
    sends: BTreeMap<usize, Vec<usize>>,
    recvs: BTreeMap<usize, Vec<usize>>,
    context: u16,
    epoch: AtomicU16,
}

impl ScatterPlan {
    fn new(
        kind: ScatterKind,
        src_len: usize,
        dst_len: usize,
        self_copies: Vec<(usize, usize)>,
        sends: BTreeMap<usize, Vec<usize>>,
        recvs: BTreeMap<usize, Vec<usize>>,
        context: u16,
    ) -> Self {
        debug_assert!(self_copies.iter().all(|&(s, d)| s < src_len && d < dst_len));
        debug_assert!(sends.values().flatten().all(|&s| s < src_len));
        debug_assert!(recvs.values().flatten().all(|&d| d < dst_len));
        Self {
            kind,
            src_len,
            dst_len,
            self_copies,
            sends,
            recvs,
            context,
            epoch: AtomicU16::new(0),
        }
    }

    /// Owned block `[xs−Xs, xs−Xs+x)` of the local vector → global positions `[0, x)`.
    pub fn local_to_global(index_map: &IndexMap) -> Self {
        let owned = index_map.owned_slots();
        let self_copies = owned.clone().enumerate().map(|(i, p)| (p, i)).collect();
        Self::new(
            ScatterKind::LocalToGlobal,
            index_map.len(),
            owned.len(),
            self_copies,
            BTreeMap::new(),
            BTreeMap::new(),
            0,
        )
    }

    /// Gather every local slot of `rank` from its owner.
    ///
    /// Sends are derived by rebuilding the index map of each peer whose halo
    /// touches this rank's owned range; no communication is needed.
    pub fn global_to_local(
        spec: &GridSpec,
        layout: &OwnershipLayout,
        rank: usize,
        index_map: &IndexMap,
    ) -> Result<Self, DaError> {
        let mine = layout.range(rank);
        let total = layout.total();
        let stencil = spec.scalar_stencil();

        let mut self_copies = Vec::with_capacity(mine.len);
        let mut recvs: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (pos, g) in index_map.iter().enumerate() {
            let owner = layout
                .owner_of(g)
                .ok_or(DaError::IndexOutOfRange { index: g, len: total })?;
            if owner == rank {
                self_copies.push((g - mine.start, pos));
            } else {
                recvs.entry(owner).or_default().push(pos);
            }
        }

        let period = spec.is_periodic().then_some(total);
        let mut sends: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for peer in (0..layout.size()).filter(|&p| p != rank) {
            let theirs = layout.range(peer);
            let halo = HaloRange::compute(theirs, stencil, total, spec.periodicity);
            if !halo.intersects(mine, period) {
                continue;
            }
            let peer_map = IndexMap::build(theirs, stencil, total, spec.periodicity);
            let wanted: Vec<usize> = peer_map
                .iter()
                .filter(|&g| mine.contains(g))
                .map(|g| g - mine.start)
                .collect();
            if !wanted.is_empty() {
                sends.insert(peer, wanted);
            }
        }

        log::debug!(
            "rank {rank}: global-to-local plan with {} self copies, {} send peers, {} receive peers",
            self_copies.len(),
            sends.len(),
            recvs.len()
        );
        Ok(Self::new(
            ScatterKind::GlobalToLocal,
            mine.len,
            index_map.len(),
            self_copies,
            sends,
            recvs,
            0,
        ))
    }

    /// Re-express a global-to-local plan over ghosted local sources.
    ///
    /// Every source position `g − xs` becomes `g − Xs`, i.e. it is shifted by
    /// this rank's `owned_offset` (`xs − Xs`). Destinations are unchanged, so the
    /// result stays in lockstep with `gtol`.
    pub fn local_to_local(gtol: &ScatterPlan, owned_offset: usize, local_len: usize) -> Self {
        debug_assert_eq!(gtol.kind, ScatterKind::GlobalToLocal);
        let self_copies = gtol
            .self_copies
            .iter()
            .map(|&(s, d)| (s + owned_offset, d))
            .collect();
        let sends = gtol
            .sends
            .iter()
            .map(|(&peer, src)| (peer, src.iter().map(|&s| s + owned_offset).collect()))
            .collect();
        Self::new(
            ScatterKind::LocalToLocal,
            local_len,
            gtol.dst_len,
            self_copies,
            sends,
            gtol.recvs.clone(),
            gtol.context,
        )
    }

    /// Swap sources and destinations of a global-to-local plan, so that local
    /// slots (ghosts included) flow back to their owners.
    pub fn ghost_accumulate(gtol: &ScatterPlan) -> Self {
        debug_assert_eq!(gtol.kind, ScatterKind::GlobalToLocal);
        Self::new(
            ScatterKind::GhostAccumulate,
            gtol.dst_len,
            gtol.src_len,
            gtol.self_copies.iter().map(|&(s, d)| (d, s)).collect(),
            gtol.recvs.clone(),
            gtol.sends.clone(),
            gtol.context,
        )
    }

    /// Move the plan into communication context `context`.
    ///
    /// Plans of different contexts never match each other's messages. Plans
    /// derived from this one afterwards inherit the context.
    pub fn with_context(mut self, context: u16) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> u16 {
        self.context
    }

    pub fn kind(&self) -> ScatterKind {
        self.kind
    }

    /// Expected length of the source vector.
    pub fn src_len(&self) -> usize {
        self.src_len
    }

    /// Expected length of the destination vector.
    pub fn dst_len(&self) -> usize {
        self.dst_len
    }

    pub fn self_copies(&self) -> &[(usize, usize)] {
        &self.self_copies
    }

    pub fn sends(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.sends
    }

    pub fn recvs(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.recvs
    }

    /// Number of destination slots filled by remote ranks.
    pub fn remote_len(&self) -> usize {
        self.recvs.values().map(Vec::len).sum()
    }

    fn next_tag(&self) -> CommTag {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        self.kind.base_tag(self.context).offset(epoch % EPOCH_WINDOW)
    }

    /// Phase one: snapshot `src`, post receives, issue sends.
    pub fn begin<'p, C, V>(
        &'p self,
        comm: &C,
        src: &[V],
        mode: InsertMode,
    ) -> Result<ScatterInFlight<'p, C, V>, DaError>
    where
        C: Communicator,
        V: Wire,
    {
        if src.len() != self.src_len {
            return Err(DaError::VectorLengthMismatch {
                expected: self.src_len,
                got: src.len(),
            });
        }
        let tag = self.next_tag().as_u16();
        log::trace!(
            "{:?} begin: tag {tag:#06x}, {} receives, {} sends",
            self.kind,
            self.recvs.len(),
            self.sends.len()
        );

        let mut recvs = Vec::with_capacity(self.recvs.len());
        for (&peer, dst) in &self.recvs {
            let mut scratch = vec![0u8; dst.len() * std::mem::size_of::<V>()];
            recvs.push((peer, comm.irecv(peer, tag, &mut scratch)));
        }

        let mut sends = Vec::with_capacity(self.sends.len());
        for (&peer, positions) in &self.sends {
            let packed: Vec<V> = positions.iter().map(|&i| src[i]).collect();
            sends.push(comm.isend(peer, tag, cast_slice(&packed)));
        }

        let local_values = self.self_copies.iter().map(|&(s, _)| src[s]).collect();
        Ok(ScatterInFlight {
            plan: self,
            mode,
            local_values,
            recvs,
            sends,
        })
    }

    /// `begin` followed immediately by `end`.
    pub fn execute<C, V>(
        &self,
        comm: &C,
        src: &[V],
        dst: &mut [V],
        mode: InsertMode,
    ) -> Result<(), DaError>
    where
        C: Communicator,
        V: Wire + AddAssign,
    {
        self.begin(comm, src, mode)?.end(dst)
    }
}

/// An invocation between `begin` and `end`.
///
/// Dropping it without calling [`end`](Self::end) leaves messages unmatched in
/// the communicator.
#[must_use = "call `end` to complete the scatter"]
pub struct ScatterInFlight<'p, C: Communicator, V> {
    plan: &'p ScatterPlan,
    mode: InsertMode,
    local_values: Vec<V>,
    recvs: Vec<(usize, C::RecvHandle)>,
    sends: Vec<C::SendHandle>,
}

impl<C: Communicator, V> ScatterInFlight<'_, C, V> {
    /// Kind of the plan this invocation runs.
    pub fn kind(&self) -> ScatterKind {
        self.plan.kind
    }
}

impl<C: Communicator, V: Wire + AddAssign> ScatterInFlight<'_, C, V> {
    /// Phase two: wait for every message, then write into `dst`.
    ///
    /// All handles are drained even when an error is returned.
    pub fn end(self, dst: &mut [V]) -> Result<(), DaError> {
        let ScatterInFlight {
            plan,
            mode,
            local_values,
            recvs,
            sends,
        } = self;

        let mut incoming = Vec::with_capacity(recvs.len());
        let mut maybe_err = None;
        for (peer, h) in recvs {
            let expected = plan.recvs[&peer].len() * std::mem::size_of::<V>();
            match h.wait() {
                Some(raw) if raw.len() == expected => match decode_vec::<V>(&raw) {
                    Some(values) => incoming.push((peer, values)),
                    None if maybe_err.is_none() => {
                        maybe_err = Some(DaError::CommError {
                            neighbor: peer,
                            message: "payload cannot be decoded".into(),
                        });
                    }
                    None => {}
                },
                Some(raw) if maybe_err.is_none() => {
                    maybe_err = Some(DaError::BufferSizeMismatch {
                        neighbor: peer,
                        expected,
                        got: raw.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(DaError::CommError {
                        neighbor: peer,
                        message: "no data received (wait returned None)".into(),
                    });
                }
                _ => {}
            }
        }
        for send in sends {
            let _ = send.wait();
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }
        if dst.len() != plan.dst_len {
            return Err(DaError::VectorLengthMismatch {
                expected: plan.dst_len,
                got: dst.len(),
            });
        }

        for (&(_, d), v) in plan.self_copies.iter().zip(local_values) {
            mode.apply(&mut dst[d], v);
        }
        for (peer, values) in incoming {
            for (&d, v) in plan.recvs[&peer].iter().zip(values) {
                mode.apply(&mut dst[d], v);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::partition::{NodesAtStart, OwnedRange};
    use crate::data::grid::Periodicity;

    fn plans(m: usize, s: usize, size: usize, rank: usize, p: Periodicity) -> (IndexMap, ScatterPlan) {
        let spec = GridSpec::new(m, 1, s, p).unwrap();
        let layout = OwnershipLayout::new(&spec, size, &NodesAtStart).unwrap();
        let map = IndexMap::build(layout.range(rank), s, m, p);
        let gtol = ScatterPlan::global_to_local(&spec, &layout, rank, &map).unwrap();
        (map, gtol)
    }

    #[test]
    fn local_to_global_copies_owned_block() {
        let map = IndexMap::build(OwnedRange::new(5, 5), 1, 10, Periodicity::Periodic);
        let plan = ScatterPlan::local_to_global(&map);
        assert_eq!(plan.src_len(), 7);
        assert_eq!(plan.dst_len(), 5);
        assert_eq!(plan.self_copies()[0], (1, 0));
        assert_eq!(plan.self_copies()[4], (5, 4));
    }

    #[test]
    fn two_rank_periodic_plan_shape() {
        let (_, gtol) = plans(10, 1, 2, 0, Periodicity::Periodic);
        // local slots 0 (g=9) and 6 (g=5) come from rank 1
        assert_eq!(gtol.recvs()[&1], vec![0, 6]);
        // rank 1 needs g=4 (its left ghost) and g=0 (its wrapped right ghost)
        assert_eq!(gtol.sends()[&1], vec![4, 0]);
        assert_eq!(gtol.self_copies().len(), 5);
        assert_eq!(gtol.remote_len(), 2);
    }

    #[test]
    fn clamped_edge_ranks_skip_far_peers() {
        let (_, gtol) = plans(12, 1, 4, 0, Periodicity::Clamped);
        assert_eq!(gtol.sends().keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(gtol.recvs().keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn local_to_local_shifts_sources_only() {
        let (map, gtol) = plans(10, 1, 2, 0, Periodicity::Periodic);
        let ltol = ScatterPlan::local_to_local(&gtol, map.owned_offset(), map.len());
        assert_eq!(ltol.sends()[&1], vec![5, 1]);
        assert_eq!(ltol.recvs(), gtol.recvs());
        assert_eq!(ltol.self_copies()[0], (1, 1));
        assert_eq!(ltol.src_len(), 7);
    }

    #[test]
    fn single_rank_execute_with_no_comm() {
        let (map, gtol) = plans(6, 2, 1, 0, Periodicity::Periodic);
        let global: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let mut local = vec![0.0; map.len()];
        gtol.execute(&NoComm, &global, &mut local, InsertMode::Insert)
            .unwrap();
        assert_eq!(local, vec![4.0, 5.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 1.0]);
    }

    #[test]
    fn add_mode_accumulates() {
        let (map, gtol) = plans(4, 1, 1, 0, Periodicity::Clamped);
        let global = vec![1i64, 2, 3, 4];
        let mut local = vec![10i64; map.len()];
        gtol.execute(&NoComm, &global, &mut local, InsertMode::Add)
            .unwrap();
        assert_eq!(local, vec![11, 12, 13, 14]);
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let (_, gtol) = plans(4, 1, 1, 0, Periodicity::Clamped);
        let err = gtol.begin::<_, f64>(&NoComm, &[0.0; 3], InsertMode::Insert);
        assert!(matches!(err, Err(DaError::VectorLengthMismatch { expected: 4, got: 3 })));
        let mut short = vec![0.0; 2];
        let err = gtol
            .execute(&NoComm, &[0.0; 4], &mut short, InsertMode::Insert)
            .unwrap_err();
        assert_eq!(err, DaError::VectorLengthMismatch { expected: 4, got: 2 });
    }

    #[derive(Copy, Clone, Debug)]
    struct Unit;
    // SAFETY: zero-sized, no invalid bit patterns
    unsafe impl bytemuck::Zeroable for Unit {}
    unsafe impl bytemuck::Pod for Unit {}
    impl AddAssign for Unit {
        fn add_assign(&mut self, _: Unit) {}
    }

    #[test]
    fn undecodable_payload_is_a_comm_error() {
        let world = crate::algs::communicator::RayonComm::world(2);
        let errs: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let (map, gtol) = plans(10, 1, 2, comm.rank(), Periodicity::Periodic);
                        let src = vec![Unit; gtol.src_len()];
                        let mut dst = vec![Unit; map.len()];
                        gtol.execute(comm, &src, &mut dst, InsertMode::Insert).err()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(
            errs.iter()
                .all(|e| matches!(e, Some(DaError::CommError { .. })))
        );
    }

    #[test]
    fn contexts_and_kinds_get_disjoint_tags() {
        let (map, gtol) = plans(10, 1, 2, 0, Periodicity::Periodic);
        let gtol = gtol.with_context(3);
        let ltol = ScatterPlan::local_to_local(&gtol, map.owned_offset(), map.len());
        assert_eq!(ltol.context(), 3);
        let a = ScatterKind::GlobalToLocal.base_tag(3).as_u16();
        let b = ScatterKind::GlobalToLocal.base_tag(4).as_u16();
        let c = ScatterKind::LocalToLocal.base_tag(3).as_u16();
        for (x, y) in [(a, b), (a, c), (b, c)] {
            assert!(x.abs_diff(y) >= EPOCH_WINDOW);
        }
        assert!(ScatterKind::GhostAccumulate.base_tag(63).as_u16() + EPOCH_WINDOW - 1 < 0x8000);
        assert!(a >= SCATTER_TAG_BASE);
    }

    #[test]
    fn ghost_accumulate_is_the_reverse() {
        let (_, gtol) = plans(10, 1, 2, 0, Periodicity::Periodic);
        let rev = ScatterPlan::ghost_accumulate(&gtol);
        assert_eq!(rev.sends(), gtol.recvs());
        assert_eq!(rev.recvs(), gtol.sends());
        assert_eq!(rev.src_len(), gtol.dst_len());
    }
}
