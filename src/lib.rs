#![cfg_attr(docsrs, feature(doc_cfg))]
//! # halo-da
//!
//! halo-da distributes a one-dimensional structured grid over a group of
//! processes (SPMD). Each process owns a contiguous block of grid nodes and
//! keeps a ghost (halo) region of `s` nodes on each side so stencil operations
//! can run on local memory.
//!
//! ## Features
//! - Three built-in partition policies plus caller-supplied sizes
//! - Periodic and clamped boundaries, with `w` degrees of freedom per node
//! - Reusable scatter plans: local-to-global, global-to-local (split
//!   `begin`/`end`), local-to-local and ghost accumulation
//! - Pluggable communication backends (serial, threaded, MPI)
//! - Global vectors with off-process assembly, norms and dot products
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! halo-da = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! Every rank calls [`DistributedArray::create`](da::DistributedArray::create)
//! with the same [`GridSpec`](data::grid::GridSpec) and
//! [`DaOptions`](da::options::DaOptions). Creation is local; only scatters,
//! assembly, reductions and synchronized viewing communicate.

pub mod algs;
pub mod da;
pub mod da_error;
pub mod data;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm, Wait};
    pub use crate::algs::partition::{
        BlockPartition, ExplicitSizes, NodesAtEnd, NodesAtStart, OwnedRange, OwnershipLayout,
        PartitionPolicy,
    };
    pub use crate::algs::scatter::{InsertMode, ScatterPlan};
    pub use crate::da::DistributedArray;
    pub use crate::da::options::{DaOptions, PartitionKind};
    pub use crate::da::view::{ArraySummary, AsciiViewer, LogViewer, Viewer};
    pub use crate::da_error::DaError;
    pub use crate::data::grid::{GridSpec, Periodicity};
    pub use crate::data::vector::{GlobalVector, NormType};
}
