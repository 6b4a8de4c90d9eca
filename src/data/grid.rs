//! GridSpec: the immutable description of a 1-D structured grid.
//!
//! A grid has `nodes` (M) nodes, `dof` (w) degrees of freedom per node and a
//! stencil of `stencil_width` (s) nodes on each side. Scalar indices address
//! individual degrees of freedom: node `i`, component `c` lives at `i * w + c`.

use crate::da_error::DaError;

/// Boundary policy for ghost points at the physical ends of the grid.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Periodicity {
    /// Ghost regions are clipped to `[0, M·w)`.
    #[default]
    Clamped,
    /// Ghost regions wrap around modulo `M·w`.
    Periodic,
}

impl Periodicity {
    pub fn is_periodic(self) -> bool {
        matches!(self, Periodicity::Periodic)
    }
}

/// Immutable grid description shared (identically) by every rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GridSpec {
    pub nodes: usize,
    pub dof: usize,
    pub stencil_width: usize,
    #[serde(default)]
    pub periodicity: Periodicity,
}

impl GridSpec {
    /// Build a spec, rejecting `nodes == 0` and `dof == 0`.
    ///
    /// The process-count dependent checks (`M >= size`, `M - 1 >= s`) run in
    /// [`validate_for`](Self::validate_for) at partition time.
    pub fn new(
        nodes: usize,
        dof: usize,
        stencil_width: usize,
        periodicity: Periodicity,
    ) -> Result<Self, DaError> {
        let spec = Self {
            nodes,
            dof,
            stencil_width,
            periodicity,
        };
        spec.check_shape()?;
        Ok(spec)
    }

    fn check_shape(&self) -> Result<(), DaError> {
        if self.nodes == 0 {
            return Err(DaError::ArgumentOutOfRange(
                "grid must have at least one node".into(),
            ));
        }
        if self.dof < 1 {
            return Err(DaError::ArgumentOutOfRange(
                "must have 1 or more degrees of freedom per node".into(),
            ));
        }
        Ok(())
    }

    /// Check the spec against a process group of `size` ranks.
    pub fn validate_for(&self, size: usize) -> Result<(), DaError> {
        self.check_shape()?;
        if size == 0 {
            return Err(DaError::ArgumentOutOfRange("empty process group".into()));
        }
        if self.nodes < size {
            return Err(DaError::ArgumentOutOfRange(format!(
                "more processors ({size}) than grid nodes ({})",
                self.nodes
            )));
        }
        if self.nodes - 1 < self.stencil_width {
            return Err(DaError::ArgumentOutOfRange(format!(
                "grid of {} nodes is too small for stencil width {}",
                self.nodes, self.stencil_width
            )));
        }
        Ok(())
    }

    /// Total number of scalar entries, `M·w`.
    pub fn scalar_len(&self) -> usize {
        self.nodes * self.dof
    }

    /// Stencil width in scalar units, `s·w`.
    pub fn scalar_stencil(&self) -> usize {
        self.stencil_width * self.dof
    }

    pub fn is_periodic(&self) -> bool {
        self.periodicity.is_periodic()
    }
}
