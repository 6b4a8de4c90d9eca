//! Creation-time options for a distributed array.

use serde::{Deserialize, Serialize};

use crate::algs::partition::{
    BlockPartition, ExplicitSizes, NodesAtEnd, NodesAtStart, PartitionPolicy,
};

/// Built-in partition policies selectable by name.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    /// Remainder nodes go to the first ranks.
    #[default]
    NodesAtStart,
    /// `xs = rank·M/size`.
    Block,
    /// Remainder nodes go to the last ranks.
    NodesAtEnd,
}

impl PartitionKind {
    /// Wire code used in configuration fingerprints.
    pub fn code(self) -> u32 {
        match self {
            PartitionKind::NodesAtStart => 0,
            PartitionKind::Block => 1,
            PartitionKind::NodesAtEnd => 2,
        }
    }
}

/// Options read once by [`DistributedArray::create`](crate::da::DistributedArray::create).
///
/// ```
/// use halo_da::da::options::{DaOptions, PartitionKind};
/// let opts = DaOptions::default().with_partition(PartitionKind::Block);
/// assert_eq!(opts.partition, PartitionKind::Block);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaOptions {
    pub partition: PartitionKind,
    /// Node count per rank; overrides `partition` when present.
    pub explicit_sizes: Option<Vec<usize>>,
    /// Report the layout through the log-backed viewer after creation.
    pub view: bool,
}

impl DaOptions {
    pub fn with_partition(mut self, partition: PartitionKind) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_explicit_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.explicit_sizes = Some(sizes);
        self
    }

    pub fn with_view(mut self, view: bool) -> Self {
        self.view = view;
        self
    }

    /// The partition policy these options select.
    pub fn policy(&self) -> Box<dyn PartitionPolicy> {
        if let Some(sizes) = &self.explicit_sizes {
            return Box::new(ExplicitSizes(sizes.clone()));
        }
        match self.partition {
            PartitionKind::NodesAtStart => Box::new(NodesAtStart),
            PartitionKind::Block => Box::new(BlockPartition),
            PartitionKind::NodesAtEnd => Box::new(NodesAtEnd),
        }
    }

    /// Fingerprint of the policy: `(code, hash of explicit sizes)`.
    pub(crate) fn policy_fingerprint(&self) -> (u32, u64) {
        match &self.explicit_sizes {
            Some(sizes) => {
                // FNV-1a over the little-endian sizes
                let hash = sizes
                    .iter()
                    .flat_map(|&n| (n as u64).to_le_bytes())
                    .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
                    });
                (u32::MAX, hash)
            }
            None => (self.partition.code(), 0),
        }
    }
}
