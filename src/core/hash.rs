//! Hashing helpers
//!
//! Provides deterministic hashing for:
//! - Board digests compared between server and client mirrors
//! - Password digests sent in `HELLO`

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for board state.
///
/// Wraps SHA-256 with typed update helpers.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for a board digest.
    pub fn for_board() -> Self {
        Self::new(b"CHAIN_REACTION_BOARD_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex SHA-256 of a plain password, as carried in `HELLO`.
///
/// No domain separator: clients and servers of other builds must agree on it.
pub fn hash_password(password: &str) -> String {
    hex::encode(hash_bytes(password.as_bytes()))
}

// =============================================================================
// TESTS
// =============================================================================
