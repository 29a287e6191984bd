//! Board Events
//!
//! Discrete notifications for the presentation layer (renderer, sound, UI).
//! The board queues them; consumers drain them with `GameBoard::take_events`.

use serde::{Serialize, Deserialize};

use super::board::GamePhase;
use super::builder::Mode;
use super::cell::Pos;
use super::energy::Energy;

/// Board event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardEventData {
    /// Board construction started
    BuildStarted {
        /// Mode the scheme is read in
        mode: Mode,
    },

    /// Board construction failed; previous board kept
    BuildFailed {
        /// Builder error text
        reason: String,
    },

    /// Phase machine switched state
    PhaseChanged {
        /// Previous phase
        from: GamePhase,
        /// New phase
        to: GamePhase,
    },

    /// Owner or power of a cell changed
    CellChanged {
        /// Cell position
        pos: Pos,
        /// Owner after the change
        owner: Energy,
        /// Power after the change
        power: u32,
    },

    /// A full cell fired into its outgoing links
    ReactionFired {
        /// Firing cell
        pos: Pos,
        /// Owner that charged the targets
        owner: Energy,
        /// Cells charged, one unit each
        targets: Vec<Pos>,
    },

    /// One cascade wave resolved
    WaveResolved {
        /// Waves so far in this cascade
        combo: u32,
    },

    /// Cascade stopped at the wave cap
    CascadeCapped {
        /// Waves run before the cut
        waves: u32,
    },

    /// Turn passed to a player
    TurnChanged {
        /// Player now to move
        player: Energy,
    },

    /// Player removed from the ring
    PlayerEliminated {
        /// Removed player
        player: Energy,
    },

    /// Rejected hit
    Warn {
        /// Position of the rejected hit
        pos: Pos,
    },

    /// Match over
    GameOver {
        /// Last player standing
        winner: Option<Energy>,
    },
}

/// A board event with its sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardEvent {
    /// Monotonic per board
    pub seq: u64,

    /// Player involved, if any
    pub player: Option<Energy>,

    /// Event data
    pub data: BoardEventData,
}

impl BoardEvent {
    /// Create a new event.
    pub fn new(seq: u64, data: BoardEventData) -> Self {
        let player = match &data {
            BoardEventData::CellChanged { owner, .. } if owner.is_player() => Some(*owner),
            BoardEventData::ReactionFired { owner, .. } if owner.is_player() => Some(*owner),
            BoardEventData::TurnChanged { player } => Some(*player),
            BoardEventData::PlayerEliminated { player } => Some(*player),
            BoardEventData::GameOver { winner } => *winner,
            _ => None,
        };

        Self { seq, player, data }
    }

    /// True for events that a sound layer plays.
    pub fn is_audible(&self) -> bool {
        matches!(
            self.data,
            BoardEventData::Warn { .. }
                | BoardEventData::ReactionFired { .. }
                | BoardEventData::GameOver { .. }
                | BoardEventData::PhaseChanged { to: GamePhase::Waiting, from: GamePhase::Build }
        )
    }
}
