//! # Chain Reaction Game Server
//!
//! Cell-graph simulation, turn scheduling and the authoritative network
//! protocol for the chain-reaction energy game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CHAIN REACTION SERVER                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - Board digests and password hashing        │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── energy.rs   - Owner tags                                │
//! │  ├── cell.rs     - Cell variants and staged energy           │
//! │  ├── graph.rs    - Cell graph and the reaction wave          │
//! │  ├── players.rs  - Turn ring with immunity                   │
//! │  ├── scheme.rs   - Board files and the saver                 │
//! │  ├── builder.rs  - Resumable board construction              │
//! │  ├── editor.rs   - Edit tools with undo/redo                 │
//! │  └── board.rs    - Phase machine                             │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── protocol.rs - Numeric-code JSON lines                   │
//! │  ├── auth.rs     - Server and account passwords              │
//! │  ├── session.rs  - Authoritative session state               │
//! │  ├── server.rs   - TCP server                                │
//! │  ├── client.rs   - Background client runtime                 │
//! │  └── mirror.rs   - Client-side board replica                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are deterministic:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies in game rules
//! - All randomness from seeded Xorshift128+
//!
//! Given the same scheme, mode, seed and hit sequence, every peer ends
//! with the same board digest.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::{CellGraph, Energy, GameBoard, GamePhase, Players, Scheme};
pub use network::{GameServer, MatchMirror, NetClient, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
