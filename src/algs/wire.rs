//! Fixed, versioned, little-endian wire types for scatter and assembly paths.
//!
//! Value payloads (`V: Wire`) travel in native layout: every rank of one run
//! shares an architecture. Counts, indices and headers are little-endian.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// Marker trait for “bytes can be shipped as-is”.
pub trait Wire: Pod + Send + Sync + 'static {}
impl<T: Pod + Send + Sync + 'static> Wire for T {}

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode `raw` into owned values; `raw.len()` must be a multiple of `size_of::<T>()`.
///
/// Goes through a zeroed buffer so unaligned receive buffers are fine.
pub fn decode_vec<T: Pod>(raw: &[u8]) -> Option<Vec<T>> {
    let width = size_of::<T>();
    if width == 0 || raw.len() % width != 0 {
        return None;
    }
    let mut out = vec![T::zeroed(); raw.len() / width];
    cast_slice_mut(&mut out).copy_from_slice(raw);
    Some(out)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// A global scalar index carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct WireIndex {
    pub idx_le: u64,
}

impl WireIndex {
    pub fn of(idx: usize) -> Self {
        Self {
            idx_le: (idx as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.idx_le) as usize
    }
}

/// Header of an assembly stash message: entry count and insert mode.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct WireStashHdr {
    pub count_le: u32,
    pub mode_le: u32, // 0 = nothing pending, 1 = insert, 2 = add
}

impl WireStashHdr {
    pub fn new(count: usize, mode: u32) -> Self {
        Self {
            count_le: (count as u32).to_le(),
            mode_le: mode.to_le(),
        }
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }
    pub fn mode(&self) -> u32 {
        u32::from_le(self.mode_le)
    }
}

/// Grid configuration fingerprint exchanged by consistency checks.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct WireGridHdr {
    pub version_le: u16,
    pub periodic_le: u16,
    pub policy_le: u32,
    pub nodes_le: u64,
    pub dof_le: u64,
    pub stencil_le: u64,
    pub size_le: u64,
    pub sizes_hash_le: u64,
}

impl WireGridHdr {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        periodic: bool,
        policy: u32,
        nodes: usize,
        dof: usize,
        stencil: usize,
        size: usize,
        sizes_hash: u64,
    ) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            periodic_le: u16::from(periodic).to_le(),
            policy_le: policy.to_le(),
            nodes_le: (nodes as u64).to_le(),
            dof_le: (dof as u64).to_le(),
            stencil_le: (stencil as u64).to_le(),
            size_le: (size as u64).to_le(),
            sizes_hash_le: sizes_hash.to_le(),
        }
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

const_assert_eq!(size_of::<WireIndex>(), 8);
const_assert_eq!(size_of::<WireStashHdr>(), 8);
const_assert_eq!(size_of::<WireGridHdr>(), 48);
