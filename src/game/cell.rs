//! Cell model and variants.
//!
//! A cell stores power and an owner. Charges arriving during a wave are
//! staged in `input_power`/`input_owner` and only committed by `fill`, so
//! every cell of a wave reacts to the same snapshot.

use serde::{Serialize, Deserialize};

use super::energy::Energy;

/// Grid coordinate `(row, col)`. Unbounded in both directions.
pub type Pos = (i32, i32);

/// Orthogonal neighbour offsets (up, right, down, left).
pub const NEIGHBOR_OFFSETS: [Pos; 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// Tint ids of the magic ports, indexed by port.
pub const MAGIC_PORTS: [u8; 6] = [0, 85, 170, 42, 128, 213];

/// Orthogonal neighbours of a position.
pub fn neighbors4(pos: Pos) -> impl Iterator<Item = Pos> {
    NEIGHBOR_OFFSETS.into_iter().map(move |(dr, dc)| (pos.0 + dr, pos.1 + dc))
}

/// True if `a` and `b` share an edge on the grid.
pub fn is_neighbor(a: Pos, b: Pos) -> bool {
    (a.0 - b.0).abs() + (a.1 - b.1).abs() == 1
}

/// Arena index of a cell. Never reused within one graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub u32);

// =============================================================================
// VARIANTS
// =============================================================================

/// Cell variant with its per-variant data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    /// Plain cell.
    Standard,
    /// Cannot be hit, still propagates.
    Close,
    /// Ignores charge, never full, no outgoing links.
    Void,
    /// Environment owned until captured; reverts to `OTHER` when drained.
    Protected,
    /// Shares one power pool with every magic cell on the same port.
    Magic {
        /// Port index into [`MAGIC_PORTS`].
        port: u8,
    },
    /// Fires only at exactly its degree, otherwise drains.
    Logic,
}

/// Highest valid cell type code.
pub const MAX_TYPE_CODE: u8 = 10;

impl CellKind {
    /// Scheme type code (`TC` column).
    pub fn code(self) -> u8 {
        match self {
            CellKind::Standard => 0,
            CellKind::Close => 1,
            CellKind::Void => 2,
            CellKind::Protected => 3,
            CellKind::Magic { port } => 4 + port,
            CellKind::Logic => 10,
        }
    }

    /// Decode a scheme type code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CellKind::Standard),
            1 => Some(CellKind::Close),
            2 => Some(CellKind::Void),
            3 => Some(CellKind::Protected),
            4..=9 => Some(CellKind::Magic { port: code - 4 }),
            10 => Some(CellKind::Logic),
            _ => None,
        }
    }

    /// Owner a freshly built cell starts with.
    pub fn initial_owner(self) -> Energy {
        match self {
            CellKind::Protected => Energy::Other,
            _ => Energy::Neutral,
        }
    }

    /// Whether the cell may be the source of a link.
    pub fn can_link_out(self) -> bool {
        !matches!(self, CellKind::Void)
    }

    /// Whether ownership of this cell keeps a player alive.
    pub fn is_considered(self) -> bool {
        !matches!(self, CellKind::Close | CellKind::Void)
    }

    /// Magic port, if any.
    pub fn port(self) -> Option<u8> {
        match self {
            CellKind::Magic { port } => Some(port),
            _ => None,
        }
    }
}

// =============================================================================
// ENERGY STATE
// =============================================================================

/// Stored and staged energy of a cell or of a magic pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyState {
    /// Current owner.
    pub owner: Energy,
    /// Current stored charge.
    pub power: u32,
    /// Charge staged during the current tick.
    pub input_power: u32,
    /// Owner staged during the current tick. `None` until the first charge.
    pub input_owner: Option<Energy>,
}

impl EnergyState {
    /// Empty state with the given owner.
    pub fn new(owner: Energy) -> Self {
        Self {
            owner,
            power: 0,
            input_power: 0,
            input_owner: None,
        }
    }

    /// Stage `amount` units from `owner`. Contested charges stage `NEUTRAL`.
    pub fn charge(&mut self, owner: Energy, amount: u32) {
        self.input_power += amount;
        self.input_owner = match self.input_owner {
            None => Some(owner),
            Some(staged) if staged == owner => Some(staged),
            Some(_) => Some(Energy::Neutral),
        };
    }

    /// Commit the staged charge.
    pub fn fill(&mut self) {
        self.power += self.input_power;
        self.owner = if self.power > 0 {
            self.input_owner.unwrap_or(self.owner)
        } else {
            Energy::Neutral
        };
        self.input_power = 0;
        self.input_owner = None;
    }
}

// =============================================================================
// CELL MODEL
// =============================================================================

/// One board position.
///
/// Links are arena indices; a magic cell's own `energy` is unused and its
/// state lives in the graph's port pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellModel {
    /// Grid position.
    pub pos: Pos,
    /// Variant.
    pub kind: CellKind,
    pub(crate) energy: EnergyState,
    pub(crate) outgoing: Vec<CellId>,
    pub(crate) incoming: Vec<CellId>,
}

impl CellModel {
    /// New unlinked cell.
    pub fn new(pos: Pos, kind: CellKind) -> Self {
        Self {
            pos,
            kind,
            energy: EnergyState::new(kind.initial_owner()),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Targets of outgoing edges, duplicates included.
    pub fn outgoing(&self) -> &[CellId] {
        &self.outgoing
    }

    /// Sources of incoming edges, duplicates included.
    pub fn incoming(&self) -> &[CellId] {
        &self.incoming
    }
}
