//! Data module: grid description and distributed vectors

pub mod grid;
pub mod vector;

pub use grid::{GridSpec, Periodicity};
pub use vector::{GlobalVector, NormType};
