//! Client-Side Match Mirror
//!
//! Replays server messages into a local [`GameBoard`]. The server has
//! already validated every `PLAYER_HIT`, so the mirror applies them in
//! arrival order for whoever holds the turn. A `CLIENT_DISCONNECTED` with
//! `exit` set for a player of the running match is a forfeit. Both wait
//! while a cascade is still animating and apply once the board is back in
//! `Waiting`.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::game::board::{BoardConfig, BoardError, GameBoard, GamePhase};
use crate::game::builder::Mode;
use crate::game::cell::Pos;
use crate::game::energy::Energy;
use crate::game::events::BoardEvent;
use crate::game::scheme::Scheme;
use crate::network::protocol::{ClientMessage, Hit, Named, ServerMessage, Start};

/// Mirror errors.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Server refused the server password.
    #[error("server password rejected")]
    WrongPassword,
    /// Server refused the account password.
    #[error("account password rejected")]
    WrongAccountPassword,
    /// `START` before any `WELCOME`.
    #[error("match started before a board was received")]
    NoScheme,
    /// Local board refused the match.
    #[error("board error: {0}")]
    Board(#[from] BoardError),
}

/// Another participant as seen by this client.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    /// Player name.
    pub name: String,
    /// Last relayed position.
    pub position: (f64, f64),
    /// False while the server retains a dropped slot.
    pub connected: bool,
    /// Energy in the running match.
    pub energy: Option<Energy>,
}

impl RemotePlayer {
    fn new(name: String, position: (f64, f64)) -> Self {
        Self { name, position, connected: true, energy: None }
    }
}

/// Relayed action waiting for the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relayed {
    Hit(Pos),
    Forfeit(Energy),
}

/// Local replica of the server's match.
pub struct MatchMirror {
    name: String,
    config: BoardConfig,
    board: GameBoard,
    scheme: Option<Scheme>,
    players: BTreeMap<String, RemotePlayer>,
    local_energy: Option<Energy>,
    assignment: Vec<(String, Energy)>,
    pending: VecDeque<Relayed>,
}

impl MatchMirror {
    /// Mirror for the player logged in as `name`.
    pub fn new(name: impl Into<String>, config: BoardConfig) -> Self {
        Self {
            name: name.into(),
            board: GameBoard::new(config.clone()),
            config,
            scheme: None,
            players: BTreeMap::new(),
            local_energy: None,
            assignment: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Local player name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The replica board.
    pub fn board(&self) -> &GameBoard {
        &self.board
    }

    /// Other players by name.
    pub fn players(&self) -> &BTreeMap<String, RemotePlayer> {
        &self.players
    }

    /// Energy assigned to the local player.
    pub fn local_energy(&self) -> Option<Energy> {
        self.local_energy
    }

    /// Relayed hits and forfeits not yet applied.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drain board events for the renderer.
    pub fn take_events(&mut self) -> Vec<BoardEvent> {
        self.board.take_events()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Apply one server message.
    pub fn apply(&mut self, msg: ServerMessage) -> Result<(), MirrorError> {
        match msg {
            ServerMessage::Welcome(welcome) => {
                self.players = welcome
                    .players
                    .into_values()
                    .map(|p| (p.name.clone(), RemotePlayer::new(p.name, p.position)))
                    .collect();
                self.show(welcome.scheme)?;
            }
            ServerMessage::NewPlayer(Named { name }) => {
                if let Some(player) = self.players.get_mut(&name) {
                    player.connected = true;
                } else {
                    self.players.insert(name.clone(), RemotePlayer::new(name, (0.0, 0.0)));
                }
            }
            ServerMessage::ClientDisconnected(gone) => {
                if gone.exit {
                    self.players.remove(&gone.name);
                    self.forfeit(&gone.name);
                } else if let Some(player) = self.players.get_mut(&gone.name) {
                    player.connected = false;
                }
            }
            ServerMessage::PlayerMove(m) => {
                if let Some(player) = self.players.get_mut(&m.name) {
                    player.position = m.position;
                }
            }
            ServerMessage::PlayerHit(hit) => {
                self.pending.push_back(Relayed::Hit(hit.hit));
                self.apply_pending();
            }
            ServerMessage::Start(start) => self.start(start)?,
            ServerMessage::Ack => {}
            ServerMessage::WrongPassword => return Err(MirrorError::WrongPassword),
            ServerMessage::WrongAccountPassword => return Err(MirrorError::WrongAccountPassword),
        }
        Ok(())
    }

    /// Advance animation and apply hits that were waiting for it.
    pub fn update(&mut self, dt: Duration) {
        self.board.update(dt);
        self.apply_pending();
    }

    /// Build `scheme` for display with nobody playing.
    fn show(&mut self, scheme: Scheme) -> Result<(), MirrorError> {
        let mut board = GameBoard::new(self.config.clone());
        board.restart(&scheme, Mode::for_scheme(&scheme))?;
        board.finish_build();
        self.board = board;
        self.scheme = Some(scheme);
        self.local_energy = None;
        self.assignment.clear();
        self.pending.clear();
        Ok(())
    }

    fn start(&mut self, start: Start) -> Result<(), MirrorError> {
        let scheme = self.scheme.clone().ok_or(MirrorError::NoScheme)?;

        let mut board = GameBoard::new(BoardConfig { shuffle_turns: false, ..self.config.clone() });
        for (_, energy) in &start.players {
            board.join(*energy)?;
        }
        board.restart(&scheme, Mode::for_scheme(&scheme))?;
        board.finish_build();

        for player in self.players.values_mut() {
            player.energy = None;
        }
        self.local_energy = None;
        for (name, energy) in &start.players {
            if *name == self.name {
                self.local_energy = Some(*energy);
            } else if let Some(player) = self.players.get_mut(name) {
                player.energy = Some(*energy);
            }
        }
        info!(energy = ?self.local_energy, phase = ?board.phase(), "match mirrored");

        self.board = board;
        self.assignment = start.players;
        self.pending.clear();
        Ok(())
    }

    /// Queue the forfeit of a player leaving the running match.
    fn forfeit(&mut self, name: &str) {
        if !matches!(self.board.phase(), GamePhase::Waiting | GamePhase::Reaction) {
            return;
        }
        let Some(energy) = self.assignment.iter().find(|(n, _)| n == name).map(|(_, e)| *e) else {
            return;
        };
        self.pending.push_back(Relayed::Forfeit(energy));
        self.apply_pending();
    }

    fn apply_pending(&mut self) {
        while self.board.phase() == GamePhase::Waiting {
            let Some(action) = self.pending.pop_front() else {
                break;
            };
            match action {
                Relayed::Hit(pos) => {
                    let outcome = self.board.hit(pos, None);
                    if outcome.is_accepted() {
                        debug!(?pos, ?outcome, "relayed hit applied");
                    } else {
                        warn!(?pos, "relayed hit rejected locally; board out of sync");
                    }
                }
                Relayed::Forfeit(energy) => {
                    if !self.board.forfeit(energy) {
                        debug!(%energy, "forfeit of a player already out");
                    }
                }
            }
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Whether the local player may hit `pos` now.
    pub fn can_hit(&self, pos: Pos) -> bool {
        self.pending.is_empty()
            && self.board.phase() == GamePhase::Waiting
            && self.local_energy.is_some()
            && self.board.current_player() == self.local_energy
            && self.board.hover(pos)
    }

    /// `HIT` for `pos` if [`can_hit`](Self::can_hit) allows it.
    pub fn hit_message(&self, pos: Pos) -> Option<ClientMessage> {
        self.can_hit(pos).then(|| ClientMessage::Hit(Hit { name: self.name.clone(), hit: pos }))
    }

    /// `READY` for the local player.
    pub fn ready_message(&self) -> ClientMessage {
        ClientMessage::Ready(Named { name: self.name.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::auth::AuthConfig;
    use crate::network::protocol::{PlayerInfo, Welcome};
    use crate::network::session::{ServerSession, SessionConfig};
    use tokio::sync::mpsc;

    fn welcome(scheme: Scheme, others: &[&str]) -> ServerMessage {
        ServerMessage::Welcome(Welcome {
            scheme,
            players: others
                .iter()
                .map(|n| (n.to_string(), PlayerInfo { name: n.to_string(), position: (0.0, 0.0) }))
                .collect(),
        })
    }

    fn instant() -> BoardConfig {
        BoardConfig { chain_reaction: false, ..BoardConfig::default() }
    }

    #[test]
    fn test_welcome_shows_board() {
        let mut mirror = MatchMirror::new("alice", instant());
        mirror.apply(welcome(Scheme::rectangle(3, 3), &["bob"])).unwrap();
        assert_eq!(mirror.board().graph().len(), 9);
        assert_eq!(mirror.board().phase(), GamePhase::Ready);
        assert!(mirror.players().contains_key("bob"));
    }

    #[test]
    fn test_start_without_welcome() {
        let mut mirror = MatchMirror::new("alice", instant());
        let start = ServerMessage::Start(Start { players: vec![("alice".into(), Energy::P1)] });
        assert!(matches!(mirror.apply(start), Err(MirrorError::NoScheme)));
    }

    #[test]
    fn test_wrong_password_surfaces() {
        let mut mirror = MatchMirror::new("alice", instant());
        assert!(matches!(mirror.apply(ServerMessage::WrongPassword), Err(MirrorError::WrongPassword)));
    }

    #[test]
    fn test_start_assigns_turns_and_gates_input() {
        let mut mirror = MatchMirror::new("alice", instant());
        mirror.apply(welcome(Scheme::rectangle(2, 2), &["bob"])).unwrap();
        let start = Start { players: vec![("alice".into(), Energy::P3), ("bob".into(), Energy::P1)] };
        mirror.apply(ServerMessage::Start(start)).unwrap();

        assert_eq!(mirror.local_energy(), Some(Energy::P3));
        assert_eq!(mirror.players()["bob"].energy, Some(Energy::P1));
        assert_eq!(mirror.board().phase(), GamePhase::Waiting);
        assert_eq!(mirror.board().current_player(), Some(Energy::P3));
        assert!(mirror.hit_message((0, 0)).is_some());

        mirror.apply(ServerMessage::PlayerHit(Hit { name: "alice".into(), hit: (0, 0) })).unwrap();
        assert_eq!(mirror.board().current_player(), Some(Energy::P1));
        assert!(mirror.hit_message((1, 1)).is_none());
    }

    #[test]
    fn test_disconnect_and_exit() {
        let mut mirror = MatchMirror::new("alice", instant());
        mirror.apply(welcome(Scheme::rectangle(2, 2), &["bob", "carol"])).unwrap();
        mirror
            .apply(ServerMessage::ClientDisconnected(crate::network::protocol::Disconnected {
                name: "bob".into(),
                exit: false,
            }))
            .unwrap();
        mirror
            .apply(ServerMessage::ClientDisconnected(crate::network::protocol::Disconnected {
                name: "carol".into(),
                exit: true,
            }))
            .unwrap();
        assert!(!mirror.players()["bob"].connected);
        assert!(!mirror.players().contains_key("carol"));

        mirror.apply(ServerMessage::NewPlayer(Named { name: "bob".into() })).unwrap();
        assert!(mirror.players()["bob"].connected);
    }

    fn pump(conns: &mut [(u64, &str, mpsc::UnboundedReceiver<ServerMessage>)], mirrors: &mut [MatchMirror]) {
        for ((_, _, rx), mirror) in conns.iter_mut().zip(mirrors.iter_mut()) {
            while let Ok(msg) = rx.try_recv() {
                mirror.apply(msg).unwrap();
            }
            for _ in 0..1_000 {
                mirror.update(Duration::from_millis(1));
                if mirror.board().phase() != GamePhase::Reaction {
                    break;
                }
            }
        }
    }

    type Conn<'a> = (u64, &'a str, mpsc::UnboundedReceiver<ServerMessage>);

    fn seat<'a>(session: &mut ServerSession, names: &[&'a str]) -> (Vec<Conn<'a>>, Vec<MatchMirror>) {
        let mut conns = Vec::new();
        let mut mirrors = Vec::new();
        for name in names {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = session.connect(tx);
            session.handle(
                conn,
                ClientMessage::Hello(crate::network::protocol::Hello {
                    name: name.to_string(),
                    password: None,
                    account_password: None,
                }),
            );
            conns.push((conn, *name, rx));
            mirrors.push(MatchMirror::new(*name, instant()));
        }
        for (conn, name, _) in &conns {
            session.handle(*conn, ClientMessage::Ready(Named { name: name.to_string() }));
        }
        pump(&mut conns, &mut mirrors);
        (conns, mirrors)
    }

    #[test]
    fn test_mirror_tracks_authoritative_board() {
        let mut session =
            ServerSession::new(SessionConfig::default(), AuthConfig::open(), Scheme::rectangle(2, 3));
        let (mut conns, mut mirrors) = seat(&mut session, &["alice", "bob"]);

        // Whoever may hit sends; everyone plays the same few moves.
        for pos in [(0, 0), (1, 2), (0, 0), (1, 2), (0, 1), (1, 1)] {
            let Some(idx) = mirrors.iter().position(|m| m.can_hit(pos)) else {
                continue;
            };
            if let Some(msg) = mirrors[idx].hit_message(pos) {
                session.handle(conns[idx].0, msg);
            }
            pump(&mut conns, &mut mirrors);
        }

        let authoritative = session.board().unwrap().digest();
        for mirror in &mirrors {
            assert_eq!(mirror.pending(), 0);
            assert_eq!(mirror.board().digest(), authoritative);
        }
    }

    #[test]
    fn test_mirror_applies_forfeit() {
        let mut session =
            ServerSession::new(SessionConfig::default(), AuthConfig::open(), Scheme::rectangle(3, 3));
        let (mut conns, mut mirrors) = seat(&mut session, &["alice", "bob", "carol"]);

        // alice moves first, then walks out on bob's turn.
        session.handle(conns[0].0, mirrors[0].hit_message((0, 0)).unwrap());
        pump(&mut conns, &mut mirrors);
        session.handle(conns[0].0, ClientMessage::Quit(Named { name: "alice".into() }));
        session.disconnect(conns[0].0);
        pump(&mut conns, &mut mirrors);

        let authoritative = session.board().unwrap().digest();
        for mirror in &mirrors[1..] {
            assert_eq!(mirror.pending(), 0);
            assert_eq!(mirror.board().players().len(), 2);
            assert!(!mirror.players().contains_key("alice"));
            assert_eq!(mirror.board().digest(), authoritative);
        }
        assert!(mirrors[1].can_hit((2, 2)));
        assert!(!mirrors[2].can_hit((2, 2)));
    }
}
