//! DistributedArray: a 1-D structured grid split over a process group.
//!
//! Creation partitions the grid, computes this rank's halo and index map, and
//! builds the scatter plans that move values between global vectors (owned
//! entries only) and local vectors (owned entries plus ghosts). It performs no
//! communication: every rank derives every plan from the shared
//! [`OwnershipLayout`].
//!
//! ```
//! use halo_da::prelude::*;
//!
//! let spec = GridSpec::new(8, 1, 1, Periodicity::Periodic)?;
//! let da = DistributedArray::create(NoComm, spec, DaOptions::default())?;
//! let mut global = da.create_global_vector::<f64>();
//! global.as_mut_slice().iter_mut().enumerate().for_each(|(i, v)| *v = i as f64);
//! let mut local = da.create_local_vector::<f64>();
//! da.global_to_local(&global, &mut local, InsertMode::Insert)?;
//! assert_eq!(local.first(), Some(&7.0));
//! # Ok::<(), halo_da::da_error::DaError>(())
//! ```

pub mod options;
pub mod view;

use std::ops::AddAssign;
use std::sync::Arc;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::ghost::HaloRange;
use crate::algs::index_map::IndexMap;
use crate::algs::ordering::OrderingMap;
use crate::algs::partition::{OwnedRange, OwnershipLayout};
use crate::algs::reduction::all_gather;
use crate::algs::scatter::{InsertMode, ScatterInFlight, ScatterKind, ScatterPlan};
use crate::algs::wire::{Wire, WireGridHdr};
use crate::da_error::DaError;
use crate::data::grid::GridSpec;
use crate::data::vector::GlobalVector;

use self::options::DaOptions;
use self::view::{ArraySummary, LogViewer, Viewer};

pub const VIEW_TOKEN_TAG: CommTag = CommTag(0x3700);
pub const VERIFY_TAG: CommTag = CommTag(0x3710);

/// Handle to one rank's share of a distributed 1-D grid.
#[derive(Debug)]
pub struct DistributedArray<C: Communicator> {
    comm: C,
    spec: GridSpec,
    options: DaOptions,
    layout: Arc<OwnershipLayout>,
    owned: OwnedRange,
    halo: HaloRange,
    index_map: IndexMap,
    ordering: OrderingMap,
    ltog: ScatterPlan,
    gtol: ScatterPlan,
    ltol: ScatterPlan,
    ghost_accumulate: ScatterPlan,
}

impl<C: Communicator> DistributedArray<C> {
    /// Partition `spec` over `comm` and build every plan.
    ///
    /// Every rank must call this with the same `spec` and `options`; use
    /// [`verify_consistent`](Self::verify_consistent) to check that they did.
    pub fn create(comm: C, spec: GridSpec, options: DaOptions) -> Result<Self, DaError> {
        let (rank, size) = (comm.rank(), comm.size());
        spec.validate_for(size)?;
        let policy = options.policy();
        let layout = Arc::new(OwnershipLayout::new(&spec, size, policy.as_ref())?);
        let owned = layout.range(rank);
        let total = layout.total();
        let stencil = spec.scalar_stencil();

        let halo = HaloRange::compute(owned, stencil, total, spec.periodicity);
        let index_map = IndexMap::for_halo(owned, &halo, stencil, total, spec.periodicity);
        if !spec.is_periodic()
            && rank > 0
            && rank + 1 < size
            && halo.left_width() != halo.right_width()
        {
            log::warn!(
                "rank {rank}: clamped halo is asymmetric ({} left, {} right); stencil reaches past a neighbor",
                halo.left_width(),
                halo.right_width()
            );
        }

        // each array gets its own tag space so concurrent scatters on one group cannot cross
        let context = comm.next_context();
        let ltog = ScatterPlan::local_to_global(&index_map).with_context(context);
        let gtol =
            ScatterPlan::global_to_local(&spec, &layout, rank, &index_map)?.with_context(context);
        let ltol = ScatterPlan::local_to_local(&gtol, index_map.owned_offset(), index_map.len());
        let ghost_accumulate = ScatterPlan::ghost_accumulate(&gtol);
        let ordering = OrderingMap::from_layout(&layout);

        log::debug!(
            "rank {rank}/{size}: created {} array, M={} w={} s={}, policy {}, owned [{}, {}), halo [{}, {}), context {context}",
            if spec.is_periodic() { "periodic" } else { "clamped" },
            spec.nodes,
            spec.dof,
            spec.stencil_width,
            policy.name(),
            owned.start,
            owned.end(),
            halo.start,
            halo.end
        );

        let da = Self {
            comm,
            spec,
            options,
            layout,
            owned,
            halo,
            index_map,
            ordering,
            ltog,
            gtol,
            ltol,
            ghost_accumulate,
        };
        if da.options.view {
            da.view(&mut LogViewer)?;
        }
        Ok(da)
    }

    /// Release the handle; plans, maps and the communicator are dropped together.
    pub fn destroy(self) {
        log::trace!("rank {}: destroying distributed array", self.rank());
    }

    // --- accessors ---

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn options(&self) -> &DaOptions {
        &self.options
    }

    /// Owned scalar range `[xs, xe)`.
    pub fn owned_range(&self) -> OwnedRange {
        self.owned
    }

    pub fn halo_range(&self) -> HaloRange {
        self.halo
    }

    pub fn index_map(&self) -> &IndexMap {
        &self.index_map
    }

    pub fn ordering(&self) -> &OrderingMap {
        &self.ordering
    }

    pub fn layout(&self) -> &OwnershipLayout {
        &self.layout
    }

    pub fn local_to_global_plan(&self) -> &ScatterPlan {
        &self.ltog
    }

    pub fn global_to_local_plan(&self) -> &ScatterPlan {
        &self.gtol
    }

    pub fn local_to_local_plan(&self) -> &ScatterPlan {
        &self.ltol
    }

    // --- vectors ---

    /// Zeroed global vector over this rank's owned range.
    pub fn create_global_vector<V: Wire + AddAssign>(&self) -> GlobalVector<V> {
        GlobalVector::new(self.layout.clone(), self.rank())
    }

    /// Zeroed local vector, one slot per index map entry.
    pub fn create_local_vector<V: Wire>(&self) -> Vec<V> {
        vec![V::zeroed(); self.index_map.len()]
    }

    // --- scatters ---

    /// Start filling a local vector (ghosts included) from `global`.
    pub fn begin_global_to_local<'a, V: Wire + AddAssign>(
        &'a self,
        global: &GlobalVector<V>,
        mode: InsertMode,
    ) -> Result<ScatterInFlight<'a, C, V>, DaError> {
        self.gtol.begin(&self.comm, global.as_slice(), mode)
    }

    /// Finish a scatter started by [`begin_global_to_local`](Self::begin_global_to_local).
    pub fn end_global_to_local<V: Wire + AddAssign>(
        &self,
        pending: ScatterInFlight<'_, C, V>,
        local: &mut [V],
    ) -> Result<(), DaError> {
        debug_assert_eq!(pending.kind(), ScatterKind::GlobalToLocal);
        pending.end(local)
    }

    pub fn global_to_local<V: Wire + AddAssign>(
        &self,
        global: &GlobalVector<V>,
        local: &mut [V],
        mode: InsertMode,
    ) -> Result<(), DaError> {
        let pending = self.begin_global_to_local(global, mode)?;
        self.end_global_to_local(pending, local)
    }

    /// Copy the owned block of `local` into `global`; ghosts are ignored.
    pub fn local_to_global<V: Wire + AddAssign>(
        &self,
        local: &[V],
        global: &mut GlobalVector<V>,
        mode: InsertMode,
    ) -> Result<(), DaError> {
        self.ltog
            .execute(&self.comm, local, global.as_mut_slice(), mode)
    }

    /// Add every local slot, ghosts included, into its owner's entry of `global`.
    pub fn local_to_global_add_ghosts<V: Wire + AddAssign>(
        &self,
        local: &[V],
        global: &mut GlobalVector<V>,
    ) -> Result<(), DaError> {
        self.ghost_accumulate
            .execute(&self.comm, local, global.as_mut_slice(), InsertMode::Add)
    }

    /// Start refreshing the ghosts of `dst` from the owned blocks of `src`
    /// on every rank.
    pub fn begin_local_to_local<'a, V: Wire + AddAssign>(
        &'a self,
        src: &[V],
        mode: InsertMode,
    ) -> Result<ScatterInFlight<'a, C, V>, DaError> {
        self.ltol.begin(&self.comm, src, mode)
    }

    pub fn end_local_to_local<V: Wire + AddAssign>(
        &self,
        pending: ScatterInFlight<'_, C, V>,
        dst: &mut [V],
    ) -> Result<(), DaError> {
        debug_assert_eq!(pending.kind(), ScatterKind::LocalToLocal);
        pending.end(dst)
    }

    pub fn local_to_local<V: Wire + AddAssign>(
        &self,
        src: &[V],
        dst: &mut [V],
        mode: InsertMode,
    ) -> Result<(), DaError> {
        let pending = self.begin_local_to_local(src, mode)?;
        self.end_local_to_local(pending, dst)
    }

    /// Set entries of `global` addressed by local (ghosted) positions.
    ///
    /// Entries owned elsewhere are stashed in `global` until
    /// [`GlobalVector::assemble`] runs.
    pub fn set_local_values<V: Wire + AddAssign>(
        &self,
        global: &mut GlobalVector<V>,
        local_indices: &[usize],
        values: &[V],
        mode: InsertMode,
    ) -> Result<(), DaError> {
        if local_indices.len() != values.len() {
            return Err(DaError::ArgumentOutOfRange(format!(
                "{} local indices but {} values",
                local_indices.len(),
                values.len()
            )));
        }
        let globals = local_indices
            .iter()
            .map(|&l| self.index_map.global(l))
            .collect::<Result<Vec<_>, _>>()?;
        global.set_values(&globals, values, mode)
    }

    /// Ship stashed values of `global` to their owners; collective.
    pub fn assemble<V: Wire + AddAssign>(&self, global: &mut GlobalVector<V>) -> Result<(), DaError> {
        global.assemble(&self.comm)
    }

    // --- reporting ---

    pub fn summary(&self) -> ArraySummary {
        ArraySummary {
            rank: self.rank(),
            nodes: self.spec.nodes,
            size: self.size(),
            dof: self.spec.dof,
            stencil_width: self.spec.stencil_width,
            owned: (self.owned.start, self.owned.end()),
            halo: (self.halo.start, self.halo.end),
            periodicity: self.spec.periodicity,
        }
    }

    /// Report this rank's layout to `viewer`.
    pub fn view(&self, viewer: &mut dyn Viewer) -> Result<(), DaError> {
        viewer.view(&self.summary())
    }

    /// Report every rank's layout in rank order; collective.
    ///
    /// Rank `r` waits for a token from `r − 1` before viewing and then passes
    /// it on to `r + 1`.
    pub fn view_synchronized(&self, viewer: &mut dyn Viewer) -> Result<(), DaError> {
        let (rank, size) = (self.rank(), self.size());
        if rank > 0 {
            let mut token = [0u8; 1];
            self.comm
                .irecv(rank - 1, VIEW_TOKEN_TAG.as_u16(), &mut token)
                .wait()
                .ok_or_else(|| DaError::CommError {
                    neighbor: rank - 1,
                    message: "view token never arrived".into(),
                })?;
        }
        let viewed = viewer.view(&self.summary());
        // pass the token even on failure so later ranks are not stuck
        if rank + 1 < size {
            let _ = self
                .comm
                .isend(rank + 1, VIEW_TOKEN_TAG.as_u16(), &[1])
                .wait();
        }
        viewed
    }

    fn fingerprint(&self) -> WireGridHdr {
        let (policy, sizes_hash) = self.options.policy_fingerprint();
        WireGridHdr::new(
            self.spec.is_periodic(),
            policy,
            self.spec.nodes,
            self.spec.dof,
            self.spec.stencil_width,
            self.size(),
            sizes_hash,
        )
    }

    /// Check that every rank created the array from the same configuration.
    ///
    /// Collective. Fails with [`DaError::InconsistentConfig`] naming the lowest
    /// rank whose configuration differs from this rank's.
    pub fn verify_consistent(&self) -> Result<(), DaError> {
        if self.comm.is_no_comm() {
            return Ok(());
        }
        let mine = self.fingerprint();
        let all = all_gather(&self.comm, VERIFY_TAG, std::slice::from_ref(&mine))?;
        match all.iter().position(|theirs| theirs.as_slice() != std::slice::from_ref(&mine)) {
            Some(rank) => {
                log::warn!(
                    "rank {}: grid configuration differs on rank {rank}",
                    self.rank()
                );
                Err(DaError::InconsistentConfig { rank })
            }
            None => Ok(()),
        }
    }
}
