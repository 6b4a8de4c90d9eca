//! Re-export public algorithms.

pub mod communicator;
pub mod ghost;
pub mod index_map;
pub mod ordering;
pub mod partition;
pub mod reduction;
pub mod scatter;
pub mod wire;

pub use partition::{OwnedRange, OwnershipLayout, PartitionPolicy, partition};
pub use scatter::{InsertMode, ScatterPlan};
