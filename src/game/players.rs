//! Turn scheduler.
//!
//! A circular singly-linked ring over the energies registered before
//! `restart`. Nodes live in an arena and link by index, so removing a node
//! mid-rotation is a pointer splice.
//!
//! Immunity: every node starts immune (nobody has acted yet), the node that
//! becomes current through `next()` is immune, and leaving the turn clears it.
//! An immune node cannot be kicked.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use super::energy::Energy;

/// Turn scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayersError {
    /// `restart` needs at least two players.
    #[error("need at least 2 players, have {0}")]
    NotEnoughPlayers(usize),
    /// Energy already registered.
    #[error("{0} already joined")]
    AlreadyJoined(Energy),
    /// Only player energies may join.
    #[error("{0} is not a player energy")]
    NotAPlayer(Energy),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Node {
    energy: Energy,
    next: usize,
    immunity: bool,
}

/// Circular player ring.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Players {
    joined: Vec<Energy>,
    nodes: Vec<Node>,
    ptr: Option<usize>,
    len: usize,
}

impl Players {
    /// Empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player for the next `restart`.
    pub fn join(&mut self, energy: Energy) -> Result<(), PlayersError> {
        if !energy.is_player() {
            return Err(PlayersError::NotAPlayer(energy));
        }
        if self.joined.contains(&energy) {
            return Err(PlayersError::AlreadyJoined(energy));
        }
        self.joined.push(energy);
        Ok(())
    }

    /// Unregister a player. The running ring is untouched.
    pub fn leave(&mut self, energy: Energy) -> bool {
        let before = self.joined.len();
        self.joined.retain(|e| *e != energy);
        before != self.joined.len()
    }

    /// Registered players in join order.
    pub fn joined(&self) -> &[Energy] {
        &self.joined
    }

    /// Build a fresh ring from the registered players.
    ///
    /// With an RNG the join order is shuffled first.
    pub fn restart(&mut self, rng: Option<&mut DeterministicRng>) -> Result<(), PlayersError> {
        if self.joined.len() < 2 {
            return Err(PlayersError::NotEnoughPlayers(self.joined.len()));
        }
        let mut order = self.joined.clone();
        if let Some(rng) = rng {
            rng.shuffle(&mut order);
        }
        let n = order.len();
        self.nodes = order
            .into_iter()
            .enumerate()
            .map(|(i, energy)| Node {
                energy,
                next: (i + 1) % n,
                immunity: true,
            })
            .collect();
        self.ptr = Some(0);
        self.len = n;
        Ok(())
    }

    /// Drop the ring. Registrations stay.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.ptr = None;
        self.len = 0;
    }

    /// Players still in the ring.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Player whose turn it is.
    pub fn current(&self) -> Option<Energy> {
        self.ptr.and_then(|p| self.nodes.get(p)).map(|n| n.energy)
    }

    /// End the current turn.
    pub fn next(&mut self) -> Option<Energy> {
        let ptr = self.ptr?;
        let next = {
            let node = self.nodes.get_mut(ptr)?;
            node.immunity = false;
            node.next
        };
        if let Some(node) = self.nodes.get_mut(next) {
            node.immunity = true;
        }
        self.ptr = Some(next);
        self.current()
    }

    fn find(&self, energy: Energy) -> Option<(usize, usize)> {
        let head = self.ptr?;
        let mut prev = head;
        for _ in 0..self.len {
            let idx = self.nodes.get(prev)?.next;
            if self.nodes.get(idx)?.energy == energy {
                return Some((prev, idx));
            }
            prev = idx;
        }
        None
    }

    /// Whether a player in the ring is currently immune.
    pub fn is_immune(&self, energy: Energy) -> bool {
        self.find(energy)
            .and_then(|(_, idx)| self.nodes.get(idx))
            .is_some_and(|n| n.immunity)
    }

    /// Whether a player is still in the ring.
    pub fn contains(&self, energy: Energy) -> bool {
        self.find(energy).is_some()
    }

    /// Eliminate a player. Returns true if the node was removed.
    ///
    /// No-op while fewer than two players remain or the player is immune.
    pub fn kick(&mut self, energy: Energy) -> bool {
        if self.len < 2 {
            return false;
        }
        let Some((prev, idx)) = self.find(energy) else {
            return false;
        };
        let Some(node) = self.nodes.get(idx) else {
            return false;
        };
        if node.immunity {
            return false;
        }
        let successor = node.next;
        if let Some(p) = self.nodes.get_mut(prev) {
            p.next = successor;
        }
        if self.ptr == Some(idx) {
            self.ptr = Some(successor);
        }
        self.len -= 1;
        true
    }

    /// Take a player out of the ring regardless of immunity.
    ///
    /// Used when a player leaves mid-match. If it was their turn the
    /// successor becomes current and immune, as after `next()`.
    pub fn remove(&mut self, energy: Energy) -> bool {
        let Some((prev, idx)) = self.find(energy) else {
            return false;
        };
        if self.len == 1 {
            self.clear();
            return true;
        }
        let Some(successor) = self.nodes.get(idx).map(|n| n.next) else {
            return false;
        };
        if let Some(p) = self.nodes.get_mut(prev) {
            p.next = successor;
        }
        if self.ptr == Some(idx) {
            self.ptr = Some(successor);
            if let Some(node) = self.nodes.get_mut(successor) {
                node.immunity = true;
            }
        }
        self.len -= 1;
        true
    }

    /// True once at most one player is left.
    pub fn has_winner(&self) -> bool {
        self.len < 2
    }

    /// Last player standing.
    pub fn winner(&self) -> Option<Energy> {
        if self.len == 1 {
            self.current()
        } else {
            None
        }
    }

    /// Turn order starting after the current player; current player last.
    pub fn queue(&self) -> Vec<Energy> {
        let Some(head) = self.ptr else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(self.len);
        let mut idx = head;
        for _ in 0..self.len {
            let Some(node) = self.nodes.get(idx) else {
                break;
            };
            idx = node.next;
            if let Some(n) = self.nodes.get(idx) {
                out.push(n.energy);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::energy::P_ENERGY;
    use proptest::prelude::*;

    fn ring(n: usize) -> Players {
        let mut players = Players::new();
        for energy in P_ENERGY.iter().take(n) {
            players.join(*energy).unwrap();
        }
        players.restart(None).unwrap();
        players
    }

    #[test]
    fn test_restart_requires_two() {
        let mut players = Players::new();
        assert_eq!(players.restart(None), Err(PlayersError::NotEnoughPlayers(0)));
        players.join(Energy::P1).unwrap();
        assert_eq!(players.restart(None), Err(PlayersError::NotEnoughPlayers(1)));
        players.join(Energy::P2).unwrap();
        assert!(players.restart(None).is_ok());
    }

    #[test]
    fn test_join_rejects_duplicates_and_environment() {
        let mut players = Players::new();
        players.join(Energy::P1).unwrap();
        assert_eq!(players.join(Energy::P1), Err(PlayersError::AlreadyJoined(Energy::P1)));
        assert_eq!(players.join(Energy::Other), Err(PlayersError::NotAPlayer(Energy::Other)));
    }

    #[test]
    fn test_queue_puts_current_last() {
        let mut players = ring(3);
        assert_eq!(players.current(), Some(Energy::P1));
        assert_eq!(players.queue(), vec![Energy::P2, Energy::P3, Energy::P1]);
        players.next();
        assert_eq!(players.queue(), vec![Energy::P3, Energy::P1, Energy::P2]);
    }

    #[test]
    fn test_fresh_players_are_immune() {
        let mut players = ring(3);
        assert!(!players.kick(Energy::P3));
        players.next();
        players.next();
        players.next();
        assert!(players.kick(Energy::P2));
        assert_eq!(players.len(), 2);
    }

    #[test]
    fn test_new_current_is_immune() {
        let mut players = ring(2);
        players.next();
        players.next();
        // P1 just became current again.
        assert_eq!(players.current(), Some(Energy::P1));
        assert!(!players.kick(Energy::P1));
        assert!(players.kick(Energy::P2));
        assert!(players.has_winner());
        assert_eq!(players.winner(), Some(Energy::P1));
    }

    #[test]
    fn test_kick_current_advances_pointer() {
        let mut players = ring(3);
        players.next();
        assert_eq!(players.current(), Some(Energy::P2));
        for node in &mut players.nodes {
            node.immunity = false;
        }
        assert!(players.kick(Energy::P2));
        assert_eq!(players.current(), Some(Energy::P3));
        assert_eq!(players.queue(), vec![Energy::P1, Energy::P3]);
    }

    #[test]
    fn test_kick_unknown_or_last_is_noop() {
        let mut players = ring(2);
        assert!(!players.kick(Energy::P8));
        players.next();
        players.next();
        assert!(players.kick(Energy::P2));
        assert!(!players.kick(Energy::P1));
        assert_eq!(players.len(), 1);
    }

    #[test]
    fn test_remove_ignores_immunity() {
        let mut players = ring(3);
        // Everyone is still immune, kick refuses.
        assert!(!players.kick(Energy::P1));
        assert!(players.remove(Energy::P1));
        assert_eq!(players.current(), Some(Energy::P2));
        assert!(players.is_immune(Energy::P2));
        assert_eq!(players.queue(), vec![Energy::P3, Energy::P2]);

        assert!(!players.remove(Energy::P1));
        assert!(players.remove(Energy::P3));
        assert_eq!(players.current(), Some(Energy::P2));
        assert!(players.has_winner());
        assert_eq!(players.winner(), Some(Energy::P2));

        assert!(players.remove(Energy::P2));
        assert!(players.is_empty());
        assert_eq!(players.current(), None);
    }

    #[test]
    fn test_shuffled_restart_keeps_everyone() {
        let mut players = Players::new();
        for energy in P_ENERGY {
            players.join(energy).unwrap();
        }
        let mut rng = DeterministicRng::new(99);
        players.restart(Some(&mut rng)).unwrap();
        let mut seen = players.queue();
        seen.sort();
        assert_eq!(seen, P_ENERGY.to_vec());
    }

    proptest! {
        #[test]
        fn test_ring_visits_each_player_once(
            n in 2usize..=8,
            kicks in prop::collection::vec(0usize..8, 0..10),
            turns in 0usize..20,
        ) {
            let mut players = ring(n);
            for _ in 0..turns {
                players.next();
            }
            // Clear initial immunity.
            for _ in 0..n {
                players.next();
            }
            let mut alive: Vec<Energy> = P_ENERGY.iter().take(n).copied().collect();
            for k in kicks {
                let energy = P_ENERGY[k];
                let immune = players.is_immune(energy);
                let removed = players.kick(energy);
                if removed {
                    alive.retain(|e| *e != energy);
                } else {
                    prop_assert!(immune || !alive.contains(&energy) || alive.len() < 2);
                }
            }

            let mut rotation = Vec::new();
            for _ in 0..players.len() {
                rotation.push(players.current().unwrap());
                players.next();
            }
            rotation.sort();
            alive.sort();
            prop_assert_eq!(&rotation, &alive);
            prop_assert_eq!(players.has_winner(), alive.len() == 1);
        }
    }
}
