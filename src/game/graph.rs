//! Cell graph and reaction engine.
//!
//! Cells live in an arena keyed by [`CellId`]; edges are directed index lists
//! and may repeat (multigraph). A wave reacts every cell once and then fills
//! every cell once, so firing order inside a wave never matters.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use super::cell::{CellId, CellKind, CellModel, EnergyState, Pos};
use super::energy::Energy;

/// Graph mutation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// No cell with this id.
    #[error("unknown cell {0:?}")]
    UnknownCell(CellId),
    /// No cell at this position.
    #[error("no cell at {0:?}")]
    EmptyPosition(Pos),
    /// Position already holds a cell.
    #[error("position {0:?} is occupied")]
    Occupied(Pos),
    /// Source cell cannot have outgoing links.
    #[error("cell at {0:?} cannot link out")]
    Unlinkable(Pos),
}

/// Shared state of every magic cell on one port.
#[derive(Clone, Debug)]
pub struct MagicPool {
    /// Pooled power and owner.
    pub energy: EnergyState,
    /// Member cells, in insertion order.
    pub members: Vec<CellId>,
}

/// Result of one wave.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WaveReport {
    /// Cells that fired, with the owner they fired as.
    pub fired: Vec<(CellId, Energy)>,
    /// Cells whose owner or power differs from before the wave.
    pub changed: Vec<CellId>,
    /// Whether any cell is full after the wave.
    pub any_full: bool,
}

/// Directed cell multigraph.
#[derive(Clone, Debug, Default)]
pub struct CellGraph {
    cells: BTreeMap<CellId, CellModel>,
    positions: BTreeMap<Pos, CellId>,
    ports: BTreeMap<u8, MagicPool>,
    next_id: u32,
}

impl CellGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if there are no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Cell at a position.
    pub fn id_at(&self, pos: Pos) -> Option<CellId> {
        self.positions.get(&pos).copied()
    }

    /// Cell by id.
    pub fn get(&self, id: CellId) -> Option<&CellModel> {
        self.cells.get(&id)
    }

    /// All cell ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.keys().copied()
    }

    /// All cells in creation order.
    pub fn cells(&self) -> impl Iterator<Item = (CellId, &CellModel)> + '_ {
        self.cells.iter().map(|(id, cell)| (*id, cell))
    }

    /// All occupied positions, sorted.
    pub fn positions(&self) -> impl Iterator<Item = Pos> + '_ {
        self.positions.keys().copied()
    }

    /// Magic pool of a port.
    pub fn pool(&self, port: u8) -> Option<&MagicPool> {
        self.ports.get(&port)
    }

    /// Every edge as `(source, target)`, duplicates included.
    pub fn edges(&self) -> Vec<(CellId, CellId)> {
        self.cells
            .iter()
            .flat_map(|(id, cell)| cell.outgoing.iter().map(move |to| (*id, *to)))
            .collect()
    }

    fn energy(&self, id: CellId) -> Option<&EnergyState> {
        let cell = self.cells.get(&id)?;
        match cell.kind {
            CellKind::Magic { port } => self.ports.get(&port).map(|pool| &pool.energy),
            _ => Some(&cell.energy),
        }
    }

    fn energy_mut(&mut self, id: CellId) -> Option<&mut EnergyState> {
        let kind = self.cells.get(&id)?.kind;
        match kind {
            CellKind::Magic { port } => self.ports.get_mut(&port).map(|pool| &mut pool.energy),
            _ => self.cells.get_mut(&id).map(|cell| &mut cell.energy),
        }
    }

    /// Current owner, resolved through the magic pool.
    pub fn owner(&self, id: CellId) -> Energy {
        self.energy(id).map(|e| e.owner).unwrap_or(Energy::Neutral)
    }

    /// Current power, resolved through the magic pool.
    pub fn power(&self, id: CellId) -> u32 {
        self.energy(id).map(|e| e.power).unwrap_or(0)
    }

    fn state(&self, id: CellId) -> (Energy, u32) {
        (self.owner(id), self.power(id))
    }

    /// Degree threshold. Magic cells sum the outgoing degree of their pool.
    pub fn lim_power(&self, id: CellId) -> u32 {
        let Some(cell) = self.cells.get(&id) else {
            return 0;
        };
        let degree = match cell.kind {
            CellKind::Magic { port } => self
                .ports
                .get(&port)
                .map(|pool| {
                    pool.members
                        .iter()
                        .filter_map(|m| self.cells.get(m))
                        .map(|m| m.outgoing.len())
                        .sum::<usize>()
                })
                .unwrap_or(0),
            _ => cell.outgoing.len(),
        };
        degree as u32
    }

    /// Whether the cell fires on the next reaction.
    ///
    /// An unlinked cell is full as soon as it is owned. A protected cell is
    /// never neutral, so an unlinked protected cell is always full and keeps
    /// any cascade going until the wave cap.
    pub fn is_full(&self, id: CellId) -> bool {
        let (Some(cell), Some(energy)) = (self.cells.get(&id), self.energy(id)) else {
            return false;
        };
        match cell.kind {
            CellKind::Void => false,
            CellKind::Logic => energy.owner != Energy::Neutral && energy.power != 0,
            _ => energy.owner != Energy::Neutral && energy.power >= self.lim_power(id),
        }
    }

    /// Whether `owner` may hit the cell at `pos`. No side effects.
    pub fn hit(&self, pos: Pos, owner: Energy) -> bool {
        self.id_at(pos).is_some_and(|id| self.hit_cell(id, owner))
    }

    /// Whether `owner` may hit a cell. No side effects.
    pub fn hit_cell(&self, id: CellId, owner: Energy) -> bool {
        let (Some(cell), Some(energy)) = (self.cells.get(&id), self.energy(id)) else {
            return false;
        };
        match cell.kind {
            CellKind::Close | CellKind::Void => false,
            CellKind::Protected => energy.owner == owner,
            _ => energy.owner == Energy::Neutral || energy.owner == owner,
        }
    }

    /// Player energies owning at least one considered cell.
    pub fn considered_owners(&self) -> BTreeSet<Energy> {
        self.cells
            .iter()
            .filter(|(_, cell)| cell.kind.is_considered())
            .map(|(id, _)| self.owner(*id))
            .filter(|owner| owner.is_player())
            .collect()
    }

    /// Digest of positions, variants, energy and edges.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_board();
        hasher.update_u32(self.cells.len() as u32);
        for (pos, id) in &self.positions {
            let Some(cell) = self.cells.get(id) else {
                continue;
            };
            hasher.update_i32(pos.0);
            hasher.update_i32(pos.1);
            hasher.update_u8(cell.kind.code());
            hasher.update_u8(self.owner(*id).value());
            hasher.update_u32(self.power(*id));
            let mut targets: Vec<Pos> = cell
                .outgoing
                .iter()
                .filter_map(|t| self.cells.get(t).map(|c| c.pos))
                .collect();
            targets.sort();
            hasher.update_u32(targets.len() as u32);
            for (row, col) in targets {
                hasher.update_i32(row);
                hasher.update_i32(col);
            }
        }
        hasher.finalize()
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Add an unlinked cell.
    pub fn insert(&mut self, pos: Pos, kind: CellKind) -> Result<CellId, GraphError> {
        if self.positions.contains_key(&pos) {
            return Err(GraphError::Occupied(pos));
        }
        let id = CellId(self.next_id);
        self.next_id += 1;

        if let CellKind::Magic { port } = kind {
            self.ports
                .entry(port)
                .or_insert_with(|| MagicPool {
                    energy: EnergyState::new(Energy::Neutral),
                    members: Vec::new(),
                })
                .members
                .push(id);
        }
        self.cells.insert(id, CellModel::new(pos, kind));
        self.positions.insert(pos, id);
        Ok(id)
    }

    /// Append the edge `a -> b`. Duplicates are kept.
    pub fn link(&mut self, a: CellId, b: CellId) -> Result<(), GraphError> {
        let source = self.cells.get(&a).ok_or(GraphError::UnknownCell(a))?;
        if !source.kind.can_link_out() {
            return Err(GraphError::Unlinkable(source.pos));
        }
        if !self.cells.contains_key(&b) {
            return Err(GraphError::UnknownCell(b));
        }
        if let Some(source) = self.cells.get_mut(&a) {
            source.outgoing.push(b);
        }
        if let Some(target) = self.cells.get_mut(&b) {
            target.incoming.push(a);
        }
        Ok(())
    }

    /// Remove one `a -> b` edge. Returns false if there was none.
    pub fn unlink(&mut self, a: CellId, b: CellId) -> bool {
        let Some(source) = self.cells.get_mut(&a) else {
            return false;
        };
        let Some(i) = source.outgoing.iter().position(|t| *t == b) else {
            return false;
        };
        source.outgoing.remove(i);
        if let Some(target) = self.cells.get_mut(&b) {
            if let Some(j) = target.incoming.iter().position(|s| *s == a) {
                target.incoming.remove(j);
            }
        }
        true
    }

    /// Remove a cell and every incident edge.
    pub fn delete(&mut self, id: CellId) -> Result<CellModel, GraphError> {
        let cell = self.cells.remove(&id).ok_or(GraphError::UnknownCell(id))?;
        for target in &cell.outgoing {
            if let Some(t) = self.cells.get_mut(target) {
                t.incoming.retain(|s| *s != id);
            }
        }
        for source in &cell.incoming {
            if let Some(s) = self.cells.get_mut(source) {
                s.outgoing.retain(|t| *t != id);
            }
        }
        self.positions.remove(&cell.pos);
        if let CellKind::Magic { port } = cell.kind {
            if let Some(pool) = self.ports.get_mut(&port) {
                pool.members.retain(|m| *m != id);
                if pool.members.is_empty() {
                    self.ports.remove(&port);
                }
            }
        }
        Ok(cell)
    }

    /// Overwrite stored power. Used for pre-charged boards.
    pub fn set_power(&mut self, id: CellId, power: u32) {
        if let Some(energy) = self.energy_mut(id) {
            energy.power = power;
        }
    }

    /// Stage `amount` units of `owner` energy on a cell.
    pub fn charge(&mut self, id: CellId, owner: Energy, amount: u32) {
        if matches!(self.cells.get(&id).map(|c| c.kind), Some(CellKind::Void)) {
            return;
        }
        if let Some(energy) = self.energy_mut(id) {
            energy.charge(owner, amount);
        }
    }

    /// Commit staged charge. Magic pools commit once; later members are no-ops.
    pub fn fill(&mut self, id: CellId) {
        let Some(kind) = self.cells.get(&id).map(|c| c.kind) else {
            return;
        };
        let Some(energy) = self.energy_mut(id) else {
            return;
        };
        energy.fill();
        if kind == CellKind::Protected && (energy.power == 0 || energy.owner == Energy::Neutral) {
            energy.owner = Energy::Other;
        }
    }

    /// Fire the cell if full. Returns the cells that fired.
    ///
    /// A magic cell fires its whole pool: every member fans out over its own
    /// links and the pool power drops to zero. A logic cell below or above its
    /// exact degree drains without firing.
    pub fn reaction(&mut self, id: CellId) -> Vec<CellId> {
        if !self.is_full(id) {
            return Vec::new();
        }
        let Some(kind) = self.cells.get(&id).map(|c| c.kind) else {
            return Vec::new();
        };
        let lim = self.lim_power(id);

        let sources: Vec<CellId> = match kind {
            CellKind::Magic { port } => self
                .ports
                .get(&port)
                .map(|pool| pool.members.clone())
                .unwrap_or_default(),
            _ => vec![id],
        };
        let targets: Vec<CellId> = sources
            .iter()
            .filter_map(|s| self.cells.get(s))
            .flat_map(|c| c.outgoing.iter().copied())
            .collect();

        let Some(energy) = self.energy_mut(id) else {
            return Vec::new();
        };
        if kind == CellKind::Logic && energy.power != lim {
            energy.power = 0;
            return Vec::new();
        }
        let owner = energy.owner;
        energy.power = 0;

        for target in targets {
            self.charge(target, owner, 1);
        }
        sources
    }

    /// One wave: react every cell, then fill every cell.
    pub fn wave(&mut self) -> WaveReport {
        let ids: Vec<CellId> = self.cells.keys().copied().collect();
        let before: Vec<(Energy, u32)> = ids.iter().map(|id| self.state(*id)).collect();

        let mut fired = Vec::new();
        for id in &ids {
            let owner = self.owner(*id);
            fired.extend(self.reaction(*id).into_iter().map(|c| (c, owner)));
        }
        for id in &ids {
            self.fill(*id);
        }

        let changed = ids
            .iter()
            .zip(before)
            .filter(|(id, prev)| self.state(**id) != *prev)
            .map(|(id, _)| *id)
            .collect();
        let any_full = ids.iter().any(|id| self.is_full(*id));

        WaveReport { fired, changed, any_full }
    }

    /// Whether any cell is full.
    pub fn any_full(&self) -> bool {
        self.cells.keys().any(|id| self.is_full(*id))
    }
}

// =============================================================================
// TESTS
// =============================================================================
