//! Partitioner: contiguous ownership ranges for a 1-D grid.
//!
//! Every policy is a pure function of `(M, size, rank)`, so any rank can
//! evaluate the partition of any other rank without communication. The
//! [`OwnershipLayout`] relies on this to answer "who owns global index `g`"
//! locally.
//!
//! Policies work in *node* units; [`partition`] and [`OwnershipLayout`] return
//! ranges in *scalar* units (node × dof).

use crate::da_error::DaError;
use crate::data::grid::GridSpec;
use itertools::Itertools;

/// Half-open range `[start, start + len)` of scalar indices owned by one rank.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OwnedRange {
    pub start: usize,
    pub len: usize,
}

impl OwnedRange {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// One past the last owned index (`xe`).
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, g: usize) -> bool {
        g >= self.start && g < self.end()
    }

    pub fn as_range(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

/// Strategy for splitting `nodes` grid nodes over `size` ranks.
pub trait PartitionPolicy: std::fmt::Debug + Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// `(first node, node count)` owned by `rank`.
    ///
    /// Callers guarantee `0 < size <= nodes` and `rank < size`.
    fn node_range(&self, nodes: usize, size: usize, rank: usize)
    -> Result<(usize, usize), DaError>;
}

/// `xs = rank·M/size`; the floor divisions spread the remainder implicitly.
#[derive(Copy, Clone, Debug, Default)]
pub struct BlockPartition;

impl PartitionPolicy for BlockPartition {
    fn name(&self) -> &'static str {
        "block"
    }

    fn node_range(
        &self,
        nodes: usize,
        size: usize,
        rank: usize,
    ) -> Result<(usize, usize), DaError> {
        let xs = rank * nodes / size;
        let x = (rank + 1) * nodes / size - xs;
        Ok((xs, x))
    }
}

/// The `M mod size` extra nodes go to the *last* ranks.
#[derive(Copy, Clone, Debug, Default)]
pub struct NodesAtEnd;

impl PartitionPolicy for NodesAtEnd {
    fn name(&self) -> &'static str {
        "nodes_at_end"
    }

    fn node_range(
        &self,
        nodes: usize,
        size: usize,
        rank: usize,
    ) -> Result<(usize, usize), DaError> {
        let x = (nodes + rank) / size;
        let xs = if nodes / size == x {
            rank * x
        } else {
            rank * (x - 1) + (nodes + rank) % (x * size)
        };
        Ok((xs, x))
    }
}

/// The `M mod size` extra nodes go to the *first* ranks (the default).
#[derive(Copy, Clone, Debug, Default)]
pub struct NodesAtStart;

impl PartitionPolicy for NodesAtStart {
    fn name(&self) -> &'static str {
        "nodes_at_start"
    }

    fn node_range(
        &self,
        nodes: usize,
        size: usize,
        rank: usize,
    ) -> Result<(usize, usize), DaError> {
        let base = nodes / size;
        let extra = nodes % size;
        let x = base + usize::from(rank < extra);
        let xs = rank * base + rank.min(extra);
        Ok((xs, x))
    }
}

/// Caller-supplied node count per rank. The full list is known on every rank,
/// so validation is local.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplicitSizes(pub Vec<usize>);

impl PartitionPolicy for ExplicitSizes {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn node_range(
        &self,
        nodes: usize,
        size: usize,
        rank: usize,
    ) -> Result<(usize, usize), DaError> {
        let counts = &self.0;
        if counts.len() != size {
            return Err(DaError::ArgumentOutOfRange(format!(
                "explicit sizes list has {} entries for {size} processors",
                counts.len()
            )));
        }
        let total: usize = counts.iter().sum();
        if total != nodes {
            return Err(DaError::ArgumentOutOfRange(format!(
                "sum of explicit sizes ({total}) not equal to M ({nodes})"
            )));
        }
        let xs = counts[..rank].iter().sum();
        Ok((xs, counts[rank]))
    }
}

/// Owned scalar range of `rank` under `policy`.
///
/// Fails with [`DaError::ArgumentOutOfRange`] if the grid cannot be split over
/// `size` ranks or the policy rejects its input.
pub fn partition(
    spec: &GridSpec,
    size: usize,
    rank: usize,
    policy: &dyn PartitionPolicy,
) -> Result<OwnedRange, DaError> {
    spec.validate_for(size)?;
    if rank >= size {
        return Err(DaError::ArgumentOutOfRange(format!(
            "rank {rank} outside process group of {size}"
        )));
    }
    let (xs, x) = policy.node_range(spec.nodes, size, rank)?;
    Ok(OwnedRange::new(xs * spec.dof, x * spec.dof))
}

/// Owned ranges of every rank, in scalar units.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OwnershipLayout {
    /// `size + 1` boundaries; rank `r` owns `[bounds[r], bounds[r+1])`.
    bounds: Vec<usize>,
}

impl OwnershipLayout {
    /// Evaluate `policy` for every rank and check that the result tiles `[0, M·w)`.
    pub fn new(
        spec: &GridSpec,
        size: usize,
        policy: &dyn PartitionPolicy,
    ) -> Result<Self, DaError> {
        let ranges = (0..size)
            .map(|rank| partition(spec, size, rank, policy))
            .collect::<Result<Vec<_>, _>>()?;
        let mut bounds = Vec::with_capacity(size + 1);
        bounds.push(0);
        for (rank, r) in ranges.iter().enumerate() {
            if r.start != bounds[rank] {
                return Err(DaError::ArgumentOutOfRange(format!(
                    "policy '{}' leaves a gap or overlap at processor {rank}",
                    policy.name()
                )));
            }
            bounds.push(r.end());
        }
        if bounds[size] != spec.scalar_len() {
            return Err(DaError::ArgumentOutOfRange(format!(
                "policy '{}' covers {} of {} entries",
                policy.name(),
                bounds[size],
                spec.scalar_len()
            )));
        }
        Ok(Self { bounds })
    }

    pub fn size(&self) -> usize {
        self.bounds.len() - 1
    }

    /// Total scalar length `M·w`.
    pub fn total(&self) -> usize {
        self.bounds[self.size()]
    }

    pub fn range(&self, rank: usize) -> OwnedRange {
        OwnedRange::new(self.bounds[rank], self.bounds[rank + 1] - self.bounds[rank])
    }

    pub fn ranges(&self) -> impl Iterator<Item = OwnedRange> + '_ {
        self.bounds
            .iter()
            .tuple_windows()
            .map(|(&a, &b)| OwnedRange::new(a, b - a))
    }

    /// Rank owning global scalar index `g`, or `None` if `g >= M·w`.
    pub fn owner_of(&self, g: usize) -> Option<usize> {
        if g >= self.total() {
            return None;
        }
        Some(self.bounds.partition_point(|&b| b <= g) - 1)
    }
}
