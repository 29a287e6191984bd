//! Game Phase Machine
//!
//! [`GameBoard`] owns the cell graph and the turn ring and drives a match:
//!
//! ```text
//!   Ready ──restart──► Build ──done──► Waiting ──hit(full)──► Reaction
//!     ▲                  │              ▲   │  ▲                  │
//!     └────failure───────┘              │   │  └──cascade over────┤
//!                                       │   └─hit──┐              │
//!                                       └──────────┘   winner ──► Finish
//!
//!   Waiting ◄──► Edit
//! ```
//!
//! Time only enters through [`GameBoard::update`]; everything else is a
//! pure reaction to calls, so two boards fed the same calls stay equal.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use super::builder::{BuildError, BuildTask, Mode};
use super::cell::{CellId, CellKind, Pos};
use super::editor::{EditCommand, EditOutcome, Editor};
use super::energy::Energy;
use super::events::{BoardEvent, BoardEventData};
use super::graph::{CellGraph, GraphError};
use super::players::{Players, PlayersError};
use super::scheme::{Saver, Scheme};

// =============================================================================
// PHASES AND CONFIG
// =============================================================================

/// Board phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    /// No match; waiting for `restart`.
    #[default]
    Ready,
    /// Board construction in progress.
    Build,
    /// Waiting for the current player's hit.
    Waiting,
    /// Cascade running.
    Reaction,
    /// One player left.
    Finish,
    /// Editor tools active; turns suspended.
    Edit,
}

/// Board tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Pause between cascade waves when animating.
    pub reaction_delay: Duration,
    /// Animate cascades. When false every update resolves one wave.
    pub chain_reaction: bool,
    /// Waves after which a cascade is cut off.
    pub max_waves: u32,
    /// Shuffle the turn order on restart.
    pub shuffle_turns: bool,
    /// Board RNG seed.
    pub seed: u64,
    /// Construction time per update.
    pub build_budget: Duration,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            reaction_delay: Duration::from_millis(500),
            chain_reaction: true,
            max_waves: 10_000,
            shuffle_turns: false,
            seed: 0,
            build_budget: Duration::from_micros(8_333), // 1/120 s
        }
    }
}

/// Board errors.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Restart rejected; board untouched.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Player registration failed.
    #[error(transparent)]
    Players(#[from] PlayersError),
    /// Edit command failed.
    #[error(transparent)]
    Edit(#[from] GraphError),
    /// Operation needs another phase.
    #[error("{op} not allowed in phase {phase:?}")]
    WrongPhase {
        /// Operation name.
        op: &'static str,
        /// Phase at the time of the call.
        phase: GamePhase,
    },
}

/// What a hit did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitOutcome {
    /// Phase does not take hits.
    Ignored,
    /// Illegal hit; a `Warn` event was queued.
    Rejected,
    /// Cell charged, turn passed.
    Passed,
    /// Cell charged and full; cascade started.
    Reaction,
    /// Editor tool applied.
    Edited,
}

impl HitOutcome {
    /// Whether the hit changed the match.
    pub fn is_accepted(self) -> bool {
        matches!(self, HitOutcome::Passed | HitOutcome::Reaction | HitOutcome::Edited)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ReactionClock {
    elapsed: Duration,
    combo: u32,
    waves: u32,
}

// =============================================================================
// BOARD
// =============================================================================

/// Cell graph, turn ring and phase machine.
pub struct GameBoard {
    config: BoardConfig,
    graph: CellGraph,
    players: Players,
    phase: GamePhase,
    mode: Option<Mode>,
    build: Option<BuildTask>,
    reaction: ReactionClock,
    editor: Editor,
    rng: DeterministicRng,
    events: Vec<BoardEvent>,
    next_seq: u64,
}

impl Default for GameBoard {
    fn default() -> Self {
        Self::new(BoardConfig::default())
    }
}

impl GameBoard {
    /// Empty board in `Ready`.
    pub fn new(config: BoardConfig) -> Self {
        let rng = DeterministicRng::new(config.seed);
        Self {
            config,
            graph: CellGraph::new(),
            players: Players::new(),
            phase: GamePhase::Ready,
            mode: None,
            build: None,
            reaction: ReactionClock::default(),
            editor: Editor::new(),
            rng,
            events: Vec::new(),
            next_seq: 0,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Board tuning.
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Mode of the last accepted restart.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Cell graph.
    pub fn graph(&self) -> &CellGraph {
        &self.graph
    }

    /// Turn ring.
    pub fn players(&self) -> &Players {
        &self.players
    }

    /// Player whose turn it is.
    pub fn current_player(&self) -> Option<Energy> {
        self.players.current()
    }

    /// Winner once in `Finish`.
    pub fn winner(&self) -> Option<Energy> {
        if self.phase == GamePhase::Finish {
            self.players.winner()
        } else {
            None
        }
    }

    /// Waves resolved in the running (or last) cascade.
    pub fn combo(&self) -> u32 {
        self.reaction.combo
    }

    /// Editor state.
    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    /// Editor state, for tool selection.
    pub fn editor_mut(&mut self) -> &mut Editor {
        &mut self.editor
    }

    /// Drain queued events.
    pub fn take_events(&mut self) -> Vec<BoardEvent> {
        std::mem::take(&mut self.events)
    }

    /// Digest of graph, phase and turn.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_board();
        hasher.update_bytes(&self.graph.digest());
        hasher.update_u8(self.phase as u8);
        hasher.update_u8(self.players.current().map(|e| e.value()).unwrap_or(0));
        hasher.update_u32(self.players.len() as u32);
        hasher.finalize()
    }

    // =========================================================================
    // PLAYERS
    // =========================================================================

    /// Register a player for the next match.
    pub fn join(&mut self, energy: Energy) -> Result<(), BoardError> {
        self.players.join(energy)?;
        Ok(())
    }

    /// Unregister a player. A running ring is untouched.
    pub fn leave(&mut self, energy: Energy) -> bool {
        self.players.leave(energy)
    }

    /// A player walks out of the running match.
    ///
    /// Only between turns (`Waiting`). The player is taken out of the ring
    /// even if immune; a lone survivor wins, and if the leaver held the turn
    /// it passes to the next player.
    pub fn forfeit(&mut self, energy: Energy) -> bool {
        if self.phase != GamePhase::Waiting {
            return false;
        }
        let was_current = self.players.current() == Some(energy);
        if !self.players.remove(energy) {
            return false;
        }
        self.players.leave(energy);
        self.emit(BoardEventData::PlayerEliminated { player: energy });
        if self.players.has_winner() {
            self.finish();
        } else if was_current {
            self.emit_turn();
        }
        true
    }

    // =========================================================================
    // RESTART AND BUILD
    // =========================================================================

    /// Start building `scheme` in `mode`.
    ///
    /// A mode that cannot read the scheme is rejected before anything
    /// changes. Otherwise the board enters `Build` and keeps showing the
    /// previous graph until construction succeeds.
    pub fn restart(&mut self, scheme: &Scheme, mode: Mode) -> Result<(), BoardError> {
        let mut rng = self.rng.clone();
        let task = BuildTask::new(scheme, mode, DeterministicRng::new(rng.next_u64()))?;
        self.rng = rng;

        self.build = Some(task);
        self.mode = Some(mode);
        self.reaction = ReactionClock::default();
        self.editor.reset();
        self.emit(BoardEventData::BuildStarted { mode });
        self.set_phase(GamePhase::Build);
        Ok(())
    }

    /// [`restart`](Self::restart) with a mode name.
    pub fn restart_named(&mut self, scheme: &Scheme, mode: &str) -> Result<(), BoardError> {
        let mode = Mode::from_str(mode)?;
        self.restart(scheme, mode)
    }

    /// Run a pending build to completion.
    pub fn finish_build(&mut self) {
        if self.phase == GamePhase::Build {
            self.update_build(None);
        }
    }

    fn update_build(&mut self, budget: Option<Duration>) {
        let Some(task) = self.build.as_mut() else {
            self.set_phase(GamePhase::Ready);
            return;
        };
        let result = match budget {
            Some(budget) => task.step(budget),
            None => task.run().map(|_| true),
        };
        match result {
            Ok(false) => {}
            Ok(true) => {
                if let Some(graph) = self.build.take().and_then(BuildTask::into_graph) {
                    self.graph = graph;
                }
                self.start_match();
            }
            Err(err) => {
                tracing::warn!(error = %err, "board build failed; keeping previous board");
                self.build = None;
                self.emit(BoardEventData::BuildFailed { reason: err.to_string() });
                self.set_phase(GamePhase::Ready);
            }
        }
    }

    fn start_match(&mut self) {
        let rng = if self.config.shuffle_turns { Some(&mut self.rng) } else { None };
        match self.players.restart(rng) {
            Ok(()) => {
                self.set_phase(GamePhase::Waiting);
                self.emit_turn();
            }
            Err(_) => {
                self.players.clear();
                self.set_phase(GamePhase::Ready);
            }
        }
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    /// Advance time-driven work: construction and cascade waves.
    pub fn update(&mut self, dt: Duration) {
        match self.phase {
            GamePhase::Build => self.update_build(Some(self.config.build_budget)),
            GamePhase::Reaction => {
                self.reaction.elapsed += dt;
                if !self.config.chain_reaction || self.reaction.elapsed >= self.config.reaction_delay {
                    self.reaction.elapsed = Duration::ZERO;
                    self.resolve_wave();
                }
            }
            _ => {}
        }
    }

    /// Resolve the running cascade without waiting.
    pub fn resolve_reaction(&mut self) {
        while self.phase == GamePhase::Reaction {
            self.resolve_wave();
        }
    }

    fn resolve_wave(&mut self) {
        let report = self.graph.wave();
        self.reaction.waves += 1;
        self.reaction.combo += 1;

        #[cfg(feature = "debug-tracing")]
        tracing::debug!(
            wave = self.reaction.waves,
            fired = report.fired.len(),
            changed = report.changed.len(),
            "cascade wave"
        );

        for (id, owner) in &report.fired {
            let Some(cell) = self.graph.get(*id) else {
                continue;
            };
            let targets = cell
                .outgoing()
                .iter()
                .filter_map(|t| self.graph.get(*t).map(|c| c.pos))
                .collect();
            let pos = cell.pos;
            self.emit(BoardEventData::ReactionFired { pos, owner: *owner, targets });
        }
        for id in &report.changed {
            self.emit_cell(*id);
        }
        self.emit(BoardEventData::WaveResolved { combo: self.reaction.combo });

        let losers = self.losers();
        for loser in &losers {
            if self.players.kick(*loser) {
                self.emit(BoardEventData::PlayerEliminated { player: *loser });
            }
        }
        if self.players.has_winner() {
            self.finish();
            return;
        }

        if report.any_full {
            if self.reaction.waves < self.config.max_waves {
                return;
            }
            tracing::warn!(waves = self.reaction.waves, "cascade cut off at wave cap");
            self.emit(BoardEventData::CascadeCapped { waves: self.reaction.waves });
        }

        // Cascade over. The mover loses immunity on leaving the turn, so a
        // mover wiped out by their own cascade goes now.
        let mover = self.players.current();
        self.players.next();
        if let Some(mover) = mover {
            if losers.contains(&mover) && self.players.kick(mover) {
                self.emit(BoardEventData::PlayerEliminated { player: mover });
            }
        }
        if self.players.has_winner() {
            self.finish();
        } else {
            self.set_phase(GamePhase::Waiting);
            self.emit_turn();
        }
    }

    /// Ring players without a considered cell.
    fn losers(&self) -> BTreeSet<Energy> {
        let alive = self.graph.considered_owners();
        self.players
            .queue()
            .into_iter()
            .filter(|p| !alive.contains(p))
            .collect()
    }

    fn finish(&mut self) {
        self.set_phase(GamePhase::Finish);
        let winner = self.players.winner();
        self.emit(BoardEventData::GameOver { winner });
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    /// A click on `pos`.
    ///
    /// In `Waiting` the hit always acts for the current player; `player`,
    /// when given, must match it. In `Edit` the click goes to the editor.
    pub fn hit(&mut self, pos: Pos, player: Option<Energy>) -> HitOutcome {
        match self.phase {
            GamePhase::Waiting => self.hit_waiting(pos, player),
            GamePhase::Edit => match self.editor.click(&mut self.graph, pos) {
                Ok(EditOutcome::Nothing) => HitOutcome::Ignored,
                Ok(_) => HitOutcome::Edited,
                Err(_) => {
                    self.emit(BoardEventData::Warn { pos });
                    HitOutcome::Rejected
                }
            },
            _ => HitOutcome::Ignored,
        }
    }

    fn hit_waiting(&mut self, pos: Pos, player: Option<Energy>) -> HitOutcome {
        let Some(current) = self.players.current() else {
            return HitOutcome::Ignored;
        };
        let id = match self.graph.id_at(pos) {
            Some(id) if player.map_or(true, |p| p == current) && self.graph.hit_cell(id, current) => id,
            _ => {
                self.emit(BoardEventData::Warn { pos });
                return HitOutcome::Rejected;
            }
        };

        self.graph.charge(id, current, 1);
        self.graph.fill(id);
        self.emit_cell(id);

        if self.graph.is_full(id) {
            self.reaction = ReactionClock::default();
            self.set_phase(GamePhase::Reaction);
            HitOutcome::Reaction
        } else {
            self.players.next();
            self.emit_turn();
            HitOutcome::Passed
        }
    }

    /// Whether a hit on `pos` by the current player would be accepted.
    pub fn hover(&self, pos: Pos) -> bool {
        match self.phase {
            GamePhase::Waiting | GamePhase::Reaction => self
                .players
                .current()
                .is_some_and(|current| self.graph.hit(pos, current)),
            GamePhase::Edit => true,
            _ => false,
        }
    }

    // =========================================================================
    // EDIT MODE
    // =========================================================================

    /// Suspend turns and open the editor. Only from `Waiting`.
    pub fn enter_edit(&mut self) -> Result<(), BoardError> {
        self.require(GamePhase::Waiting, "enter_edit")?;
        self.editor.reset();
        self.set_phase(GamePhase::Edit);
        Ok(())
    }

    /// Close the editor and resume the turn.
    pub fn leave_edit(&mut self) -> Result<(), BoardError> {
        self.require(GamePhase::Edit, "leave_edit")?;
        self.set_phase(GamePhase::Waiting);
        Ok(())
    }

    /// Revert the last edit.
    pub fn undo(&mut self) -> Result<Option<EditCommand>, BoardError> {
        self.require(GamePhase::Edit, "undo")?;
        Ok(self.editor.undo(&mut self.graph)?)
    }

    /// Reapply the last undone edit.
    pub fn redo(&mut self) -> Result<Option<EditCommand>, BoardError> {
        self.require(GamePhase::Edit, "redo")?;
        Ok(self.editor.redo(&mut self.graph)?)
    }

    /// Serialize the current graph for `mode`.
    pub fn save(&self, mode: Mode) -> Scheme {
        match mode {
            Mode::Old | Mode::Recharged => Saver::legacy(&self.graph),
            Mode::Classic => Saver::classic(&self.graph),
            Mode::Extended => Saver::extended(&self.graph),
        }
    }

    fn require(&self, phase: GamePhase, op: &'static str) -> Result<(), BoardError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(BoardError::WrongPhase { op, phase: self.phase })
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    fn emit(&mut self, data: BoardEventData) {
        self.next_seq += 1;
        self.events.push(BoardEvent::new(self.next_seq, data));
    }

    fn set_phase(&mut self, to: GamePhase) {
        let from = self.phase;
        if from != to {
            self.phase = to;
            self.emit(BoardEventData::PhaseChanged { from, to });
        }
    }

    fn emit_turn(&mut self) {
        if let Some(player) = self.players.current() {
            self.emit(BoardEventData::TurnChanged { player });
        }
    }

    /// Queue `CellChanged` for a cell, or for its whole pool if magic.
    fn emit_cell(&mut self, id: CellId) {
        let members: Vec<CellId> = match self.graph.get(id).map(|c| c.kind) {
            Some(CellKind::Magic { port }) => self
                .graph
                .pool(port)
                .map(|pool| pool.members.clone())
                .unwrap_or_default(),
            Some(_) => vec![id],
            None => Vec::new(),
        };
        for member in members {
            let Some(pos) = self.graph.get(member).map(|c| c.pos) else {
                continue;
            };
            let owner = self.graph.owner(member);
            let power = self.graph.power(member);
            self.emit(BoardEventData::CellChanged { pos, owner, power });
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
