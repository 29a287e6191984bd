//! Resumable board construction.
//!
//! A [`BuildTask`] turns a [`Scheme`] into a [`CellGraph`] one unit of work
//! at a time (one record, one cell's links, one pre-charge), so a caller can
//! spread a large board over several update ticks.

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use super::cell::{neighbors4, CellId, CellKind, Pos};
use super::graph::{CellGraph, GraphError};
use super::scheme::{legacy_positions, CellRecord, LinkRecord, ScanFormat, Scheme, SchemeError, TypedScheme};

/// Board construction mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Legacy coordinates, adjacency inferred.
    Old,
    /// Legacy coordinates, every cell pre-charged below its degree.
    Recharged,
    /// Typed scheme, every cell standard.
    Classic,
    /// Typed scheme with variants.
    Extended,
}

impl Mode {
    /// Natural mode for a scheme representation.
    pub fn for_scheme(scheme: &Scheme) -> Self {
        if scheme.is_typed() {
            Mode::Extended
        } else {
            Mode::Old
        }
    }

    /// Whether this mode reads typed schemes.
    pub fn is_typed(self) -> bool {
        matches!(self, Mode::Classic | Mode::Extended)
    }
}

impl FromStr for Mode {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "old" => Ok(Mode::Old),
            "recharged" => Ok(Mode::Recharged),
            "classic" => Ok(Mode::Classic),
            "extended" => Ok(Mode::Extended),
            _ => Err(BuildError::UnknownMode(s.to_string())),
        }
    }
}

/// Board construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Mode name not recognised.
    #[error("unknown game mode {0:?}")]
    UnknownMode(String),
    /// Mode cannot read this scheme representation.
    #[error("mode {mode:?} cannot build a {representation} scheme")]
    ModeMismatch {
        /// Requested mode.
        mode: Mode,
        /// `legacy` or `typed`.
        representation: &'static str,
    },
    /// Malformed scheme.
    #[error(transparent)]
    Scheme(#[from] SchemeError),
    /// Graph rejected a record.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

enum Source {
    Legacy(String),
    Typed(ScanFormat, TypedScheme),
}

#[derive(Clone, Copy)]
enum Stage {
    Parse,
    Cells(usize),
    Links(usize),
    Charge(usize),
    Done,
}

/// Incremental builder.
pub struct BuildTask {
    mode: Mode,
    source: Source,
    stage: Stage,
    positions: Vec<Pos>,
    cell_records: Vec<CellRecord>,
    link_records: Vec<LinkRecord>,
    ids: Vec<CellId>,
    graph: CellGraph,
    rng: DeterministicRng,
}

impl BuildTask {
    /// Validate mode and scan format and prepare the task.
    ///
    /// Streams are decoded by the first `step`.
    pub fn new(scheme: &Scheme, mode: Mode, rng: DeterministicRng) -> Result<Self, BuildError> {
        let source = match (scheme, mode.is_typed()) {
            (Scheme::Legacy(coords), false) => Source::Legacy(coords.clone()),
            (Scheme::Typed(typed), true) => Source::Typed(ScanFormat::parse(&typed.scanfmt)?, typed.clone()),
            (Scheme::Legacy(_), true) => {
                return Err(BuildError::ModeMismatch { mode, representation: "legacy" })
            }
            (Scheme::Typed(_), false) => {
                return Err(BuildError::ModeMismatch { mode, representation: "typed" })
            }
        };
        Ok(Self {
            mode,
            source,
            stage: Stage::Parse,
            positions: Vec::new(),
            cell_records: Vec::new(),
            link_records: Vec::new(),
            ids: Vec::new(),
            graph: CellGraph::new(),
            rng,
        })
    }

    /// Mode being built.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True once the graph is complete.
    pub fn is_done(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    /// Work until done or until `budget` has elapsed. At least one unit runs.
    pub fn step(&mut self, budget: Duration) -> Result<bool, BuildError> {
        let start = Instant::now();
        loop {
            if self.advance()? {
                return Ok(true);
            }
            if start.elapsed() >= budget {
                return Ok(false);
            }
        }
    }

    /// Run at most `units` units of work.
    pub fn step_units(&mut self, units: usize) -> Result<bool, BuildError> {
        for _ in 0..units {
            if self.advance()? {
                return Ok(true);
            }
        }
        Ok(self.is_done())
    }

    /// Run to completion.
    pub fn run(&mut self) -> Result<(), BuildError> {
        while !self.advance()? {}
        Ok(())
    }

    /// The finished graph, or `None` if work remains.
    pub fn into_graph(self) -> Option<CellGraph> {
        if self.is_done() {
            Some(self.graph)
        } else {
            None
        }
    }

    fn cell_count(&self) -> usize {
        match self.source {
            Source::Legacy(_) => self.positions.len(),
            Source::Typed(..) => self.cell_records.len(),
        }
    }

    fn after_links(&self) -> Stage {
        if self.mode == Mode::Recharged {
            Stage::Charge(0)
        } else {
            Stage::Done
        }
    }

    fn advance(&mut self) -> Result<bool, BuildError> {
        self.stage = match self.stage {
            Stage::Parse => {
                match &self.source {
                    Source::Legacy(coords) => self.positions = legacy_positions(coords)?,
                    Source::Typed(fmt, typed) => {
                        self.cell_records = fmt.cell_records(&typed.cells)?;
                        self.link_records = fmt.link_records(&typed.links)?;
                    }
                }
                Stage::Cells(0)
            }
            Stage::Cells(i) if i >= self.cell_count() => Stage::Links(0),
            Stage::Cells(i) => {
                self.place_cell(i)?;
                Stage::Cells(i + 1)
            }
            Stage::Links(i) => {
                let total = match self.source {
                    Source::Legacy(_) => self.ids.len(),
                    Source::Typed(..) => self.link_records.len(),
                };
                if i >= total {
                    self.after_links()
                } else {
                    self.link_unit(i)?;
                    Stage::Links(i + 1)
                }
            }
            Stage::Charge(i) => match self.ids.get(i) {
                Some(id) => {
                    let lim = self.graph.lim_power(*id);
                    let power = self.rng.next_int(lim);
                    self.graph.set_power(*id, power);
                    Stage::Charge(i + 1)
                }
                None => Stage::Done,
            },
            Stage::Done => Stage::Done,
        };
        Ok(self.is_done())
    }

    fn place_cell(&mut self, i: usize) -> Result<(), BuildError> {
        match self.source {
            Source::Legacy(_) => {
                let Some(pos) = self.positions.get(i).copied() else {
                    return Ok(());
                };
                if self.graph.id_at(pos).is_none() {
                    let id = self.graph.insert(pos, CellKind::Standard)?;
                    self.ids.push(id);
                }
            }
            Source::Typed(..) => {
                let Some(record) = self.cell_records.get(i).copied() else {
                    return Ok(());
                };
                let kind = if self.mode == Mode::Extended {
                    u8::try_from(record.type_code)
                        .ok()
                        .and_then(CellKind::from_code)
                        .ok_or(SchemeError::UnknownCellType(record.type_code))?
                } else {
                    CellKind::Standard
                };
                let id = self.graph.insert(record.pos, kind).map_err(|e| match e {
                    GraphError::Occupied(pos) => BuildError::Scheme(SchemeError::DuplicatePosition(pos)),
                    other => BuildError::Graph(other),
                })?;
                self.ids.push(id);
            }
        }
        Ok(())
    }

    fn link_unit(&mut self, i: usize) -> Result<(), BuildError> {
        match self.source {
            Source::Legacy(_) => {
                let Some(id) = self.ids.get(i).copied() else {
                    return Ok(());
                };
                let Some(pos) = self.graph.get(id).map(|c| c.pos) else {
                    return Ok(());
                };
                for n in neighbors4(pos) {
                    if let Some(other) = self.graph.id_at(n).filter(|other| *other < id) {
                        self.graph.link(other, id)?;
                        self.graph.link(id, other)?;
                    }
                }
            }
            Source::Typed(..) => {
                let Some(record) = self.link_records.get(i).copied() else {
                    return Ok(());
                };
                let cells = self.ids.len();
                for (a, b) in record.edges() {
                    let (Some(from), Some(to)) = (self.ids.get(a).copied(), self.ids.get(b).copied()) else {
                        let index = if a >= cells { a } else { b };
                        return Err(SchemeError::IndexOutOfRange { index, cells }.into());
                    };
                    match self.graph.link(from, to) {
                        Ok(()) | Err(GraphError::Unlinkable(_)) => {}
                        Err(other) => return Err(other.into()),
                    }
                }
            }
        }
        Ok(())
    }
}
