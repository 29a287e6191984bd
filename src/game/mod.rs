//! Game Logic Module
//!
//! Board rules and match flow. Deterministic given the same calls and seed.
//!
//! ## Module Structure
//!
//! - `energy`: Owner tags
//! - `cell`: Cell variants, positions, staged energy
//! - `graph`: Cell multigraph and the reaction wave
//! - `players`: Turn ring with immunity
//! - `scheme`: Board file formats and the saver
//! - `builder`: Resumable board construction
//! - `editor`: Edit tools with undo/redo
//! - `board`: Phase machine tying it all together
//! - `events`: Notifications for the presentation layer

pub mod energy;
pub mod cell;
pub mod graph;
pub mod players;
pub mod scheme;
pub mod builder;
pub mod editor;
pub mod board;
pub mod events;

// Re-export key types
pub use energy::{Energy, P_ENERGY};
pub use cell::{CellId, CellKind, Pos};
pub use graph::{CellGraph, GraphError, WaveReport};
pub use players::{Players, PlayersError};
pub use scheme::{Saver, Scheme, SchemeError, SchemeFile, TypedScheme};
pub use builder::{BuildError, BuildTask, Mode};
pub use editor::{AutoLink, EditCommand, Editor, Tool};
pub use board::{BoardConfig, BoardError, GameBoard, GamePhase, HitOutcome};
pub use events::{BoardEvent, BoardEventData};
