//! Human-readable layout reports.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::da_error::DaError;
use crate::data::grid::Periodicity;

/// Per-rank description of a distributed array's layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySummary {
    pub rank: usize,
    pub nodes: usize,
    pub size: usize,
    pub dof: usize,
    pub stencil_width: usize,
    /// Owned scalar range `[xs, xe)`.
    pub owned: (usize, usize),
    /// Halo `[Xs, Xe)`; may extend past `[0, M·w)` on periodic grids.
    pub halo: (isize, isize),
    pub periodicity: Periodicity,
}

/// Sink for layout reports.
pub trait Viewer {
    fn view(&mut self, summary: &ArraySummary) -> Result<(), DaError>;
}

/// Plain-text viewer:
///
/// ```text
/// Processor [0] M 7 m 3 w 1 s 1
/// X range: 0 3
/// ```
#[derive(Debug)]
pub struct AsciiViewer<W: Write> {
    out: W,
}

impl<W: Write> AsciiViewer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Viewer for AsciiViewer<W> {
    fn view(&mut self, s: &ArraySummary) -> Result<(), DaError> {
        writeln!(
            self.out,
            "Processor [{}] M {} m {} w {} s {}",
            s.rank, s.nodes, s.size, s.dof, s.stencil_width
        )?;
        writeln!(self.out, "X range: {} {}", s.owned.0, s.owned.1)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Viewer writing through the `log` facade at info level.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogViewer;

impl Viewer for LogViewer {
    fn view(&mut self, s: &ArraySummary) -> Result<(), DaError> {
        log::info!(
            "Processor [{}] M {} m {} w {} s {}; X range: {} {}; halo: {} {}",
            s.rank,
            s.nodes,
            s.size,
            s.dof,
            s.stencil_width,
            s.owned.0,
            s.owned.1,
            s.halo.0,
            s.halo.1
        );
        Ok(())
    }
}
