//! Core deterministic primitives.
//!
//! Seeded randomness and hashing shared by the game and network layers.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{StateHasher, StateHash, hash_password};
