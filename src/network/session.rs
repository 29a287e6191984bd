//! Match Session Management
//!
//! The authoritative server state: player registry, connection bindings,
//! ready gating, energy assignment and the authoritative [`GameBoard`].
//! A player who leaves for good during a match forfeits; a dropped player
//! whose slot is retained keeps their energy and may rejoin.
//! Handlers are synchronous and run to completion, so each message is
//! applied atomically with respect to every other connection. Replies go
//! out through per-connection channels drained by the transport.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::rng::{derive_match_seed, DeterministicRng};
use crate::game::board::{BoardConfig, BoardError, GameBoard, GamePhase};
use crate::game::builder::Mode;
use crate::game::energy::{Energy, P_ENERGY};
use crate::game::events::BoardEventData;
use crate::game::scheme::Scheme;
use crate::network::auth::{AccountRegistry, AuthConfig};
use crate::network::protocol::{
    ClientMessage, Disconnected, Hello, Hit, Move, Named, PlayerInfo, ServerMessage, Start, Welcome,
};

/// Per-connection identifier assigned by [`ServerSession::connect`].
pub type ConnectionId = u64;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for players to ready up.
    Lobby,
    /// Match in progress.
    Playing,
}

/// Connection state for rejoin support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Bound to a live connection.
    Connected(ConnectionId),
    /// Slot retained, waiting for the same name to log in again.
    Disconnected,
}

/// Configuration for the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Keep a dropped player's slot for a later `HELLO`.
    pub allow_rejoin: bool,
    /// Minimum ready players to start.
    pub min_players: usize,
    /// Registry capacity.
    pub max_players: usize,
    /// Mixed into every match seed.
    pub server_seed: u64,
    /// Authoritative board tuning.
    pub board: BoardConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_rejoin: true,
            min_players: 2,
            max_players: P_ENERGY.len(),
            server_seed: 0,
            board: BoardConfig {
                chain_reaction: false,
                ..BoardConfig::default()
            },
        }
    }
}

/// A registered player.
#[derive(Debug, Clone)]
pub struct SessionPlayer {
    /// Registry key.
    pub name: String,
    /// Ready for the next match.
    pub ready: bool,
    /// Last reported avatar position.
    pub position: (f64, f64),
    /// Connection binding.
    pub connection_state: ConnectionState,
    /// Energy in the running match, if playing.
    pub energy: Option<Energy>,
}

impl SessionPlayer {
    /// Check if player is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state, ConnectionState::Connected(_))
    }
}

/// What the transport should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Flush pending replies and close.
    Close,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Registry is full.
    #[error("Session is full")]
    SessionFull,

    /// Name bound to another live connection.
    #[error("Name {0} already connected")]
    NameInUse(String),

    /// Not enough ready players.
    #[error("Need {needed} ready players, have {have}")]
    NotEnoughPlayers {
        /// Required.
        needed: usize,
        /// Present.
        have: usize,
    },

    /// Board refused to start.
    #[error("Board error: {0}")]
    Board(#[from] BoardError),

    /// Board built but has no playable turn.
    #[error("Board ended in phase {0:?} after build")]
    BoardNotPlayable(GamePhase),
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerMessage>,
    name: Option<String>,
}

/// Accepted match action, replayed to rejoining players.
#[derive(Debug, Clone)]
enum MatchRecord {
    Hit(Hit),
    Left(Disconnected),
}

impl MatchRecord {
    fn message(&self) -> ServerMessage {
        match self {
            MatchRecord::Hit(hit) => ServerMessage::PlayerHit(hit.clone()),
            MatchRecord::Left(gone) => ServerMessage::ClientDisconnected(gone.clone()),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Authoritative server state.
pub struct ServerSession {
    config: SessionConfig,
    auth: AuthConfig,
    accounts: AccountRegistry,
    scheme: Scheme,
    state: SessionState,
    connections: BTreeMap<ConnectionId, Connection>,
    players: BTreeMap<String, SessionPlayer>,
    next_connection: ConnectionId,
    board: Option<GameBoard>,
    match_id: Option<[u8; 16]>,
    assignment: Vec<(String, Energy)>,
    history: Vec<MatchRecord>,
}

impl ServerSession {
    /// Create a new session serving `scheme`.
    pub fn new(config: SessionConfig, auth: AuthConfig, scheme: Scheme) -> Self {
        Self {
            config,
            auth,
            accounts: AccountRegistry::new(),
            scheme,
            state: SessionState::Lobby,
            connections: BTreeMap::new(),
            players: BTreeMap::new(),
            next_connection: 1,
            board: None,
            match_id: None,
            assignment: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Register a transport connection.
    pub fn connect(&mut self, sender: mpsc::UnboundedSender<ServerMessage>) -> ConnectionId {
        let id = self.next_connection;
        self.next_connection += 1;
        self.connections.insert(id, Connection { sender, name: None });
        id
    }

    /// Get session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Live connections, logged in or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Registered players, connected or retained.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Look up a player.
    pub fn player(&self, name: &str) -> Option<&SessionPlayer> {
        self.players.get(name)
    }

    /// Authoritative board of the current or last match.
    pub fn board(&self) -> Option<&GameBoard> {
        self.board.as_ref()
    }

    /// Identifier of the current or last match.
    pub fn match_id(&self) -> Option<[u8; 16]> {
        self.match_id
    }

    /// Name → energy pairs of the current or last match.
    pub fn assignment(&self) -> &[(String, Energy)] {
        &self.assignment
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Apply one client message.
    pub fn handle(&mut self, conn: ConnectionId, msg: ClientMessage) -> Flow {
        if let ClientMessage::Heartbeat = msg {
            self.send(conn, ServerMessage::Ack);
            return Flow::Continue;
        }
        if let ClientMessage::Hello(hello) = msg {
            return self.handle_hello(conn, hello);
        }

        // Everything else needs a login under the named player.
        let bound = self.connections.get(&conn).and_then(|c| c.name.as_deref());
        if bound != msg.name() {
            debug!(conn, code = ?msg.code(), "ignoring message for unbound name");
            return Flow::Continue;
        }

        match msg {
            ClientMessage::Move(m) => self.handle_move(conn, m),
            ClientMessage::Hit(h) => self.handle_hit(h),
            ClientMessage::Ready(r) => self.handle_ready(r),
            ClientMessage::Quit(q) => return self.handle_quit(conn, q),
            ClientMessage::Pass(p) => debug!(name = %p.name, "pass ignored"),
            ClientMessage::Hello(_) | ClientMessage::Heartbeat => {}
        }
        Flow::Continue
    }

    /// Transport lost the connection.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        let Some(name) = connection.name else {
            return;
        };

        let exit = !self.config.allow_rejoin;
        if exit {
            self.players.remove(&name);
            self.forfeit(&name);
        } else if let Some(player) = self.players.get_mut(&name) {
            player.connection_state = ConnectionState::Disconnected;
        }
        info!(%name, exit, "player disconnected");
        self.broadcast(ServerMessage::ClientDisconnected(Disconnected { name, exit }), None);
        if exit {
            self.try_start();
        }
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    fn handle_hello(&mut self, conn: ConnectionId, hello: Hello) -> Flow {
        if self.auth.check_server_password(hello.password.as_deref()).is_err() {
            warn!(name = %hello.name, "wrong server password");
            self.send(conn, ServerMessage::WrongPassword);
            return Flow::Close;
        }
        if self.connections.get(&conn).is_some_and(|c| c.name.is_some()) {
            debug!(conn, "repeated HELLO ignored");
            return Flow::Continue;
        }
        if let Err(e) = self.accounts.verify_or_register(&hello.name, hello.account_password.as_deref()) {
            warn!(error = %e, "account rejected");
            self.send(conn, ServerMessage::WrongAccountPassword);
            return Flow::Close;
        }

        match self.join_player(conn, &hello.name) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(name = %hello.name, error = %e, "join refused");
                Flow::Close
            }
        }
    }

    fn join_player(&mut self, conn: ConnectionId, name: &str) -> Result<(), SessionError> {
        let fresh = match self.players.get_mut(name) {
            Some(player) if player.is_connected() => return Err(SessionError::NameInUse(name.to_string())),
            Some(player) => {
                player.connection_state = ConnectionState::Connected(conn);
                info!(%name, "player rejoined");
                false
            }
            None => {
                if self.players.len() >= self.config.max_players {
                    return Err(SessionError::SessionFull);
                }
                self.players.insert(name.to_string(), SessionPlayer {
                    name: name.to_string(),
                    ready: false,
                    position: (0.0, 0.0),
                    connection_state: ConnectionState::Connected(conn),
                    energy: None,
                });
                info!(%name, "player joined");
                true
            }
        };
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.name = Some(name.to_string());
        }

        let others = self
            .players
            .values()
            .filter(|p| p.name != name)
            .map(|p| (p.name.clone(), PlayerInfo { name: p.name.clone(), position: p.position }))
            .collect();
        self.send(conn, ServerMessage::Welcome(Welcome { scheme: self.scheme.clone(), players: others }));
        if fresh {
            self.broadcast(ServerMessage::NewPlayer(Named { name: name.to_string() }), Some(conn));
        }

        match self.state {
            SessionState::Playing => {
                self.send(conn, ServerMessage::Start(Start { players: self.assignment.clone() }));
                for record in &self.history {
                    self.send(conn, record.message());
                }
            }
            // A returning player may have been the last one holding the lobby up.
            SessionState::Lobby if !fresh => self.try_start(),
            SessionState::Lobby => {}
        }
        Ok(())
    }

    fn handle_move(&mut self, conn: ConnectionId, m: Move) {
        if let Some(player) = self.players.get_mut(&m.name) {
            player.position = m.position;
        }
        self.broadcast(ServerMessage::PlayerMove(m), Some(conn));
    }

    fn handle_hit(&mut self, hit: Hit) {
        if self.state != SessionState::Playing {
            debug!(name = %hit.name, "hit outside a match");
            return;
        }
        let Some(energy) = self.players.get(&hit.name).and_then(|p| p.energy) else {
            debug!(name = %hit.name, "hit from spectator");
            return;
        };
        let Some(board) = self.board.as_mut() else {
            return;
        };

        let outcome = board.hit(hit.hit, Some(energy));
        if !outcome.is_accepted() {
            info!(name = %hit.name, pos = ?hit.hit, ?outcome, "hit rejected");
            board.take_events();
            return;
        }
        board.resolve_reaction();
        let finished = board.phase() == GamePhase::Finish;
        let winner = board.winner();
        let events = board.take_events();

        for event in events {
            match event.data {
                BoardEventData::PlayerEliminated { player } => info!(%player, "player eliminated"),
                BoardEventData::CascadeCapped { waves } => warn!(waves, "cascade capped"),
                _ => {}
            }
        }
        debug!(name = %hit.name, pos = ?hit.hit, "hit accepted");
        self.history.push(MatchRecord::Hit(hit.clone()));
        self.broadcast(ServerMessage::PlayerHit(hit), None);

        if finished {
            self.finish_match(winner);
        }
    }

    fn handle_ready(&mut self, ready: Named) {
        if let Some(player) = self.players.get_mut(&ready.name) {
            player.ready = true;
            info!(name = %ready.name, "player ready");
        }
        self.try_start();
    }

    fn handle_quit(&mut self, conn: ConnectionId, quit: Named) -> Flow {
        self.players.remove(&quit.name);
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.name = None;
        }
        info!(name = %quit.name, "player quit");
        self.forfeit(&quit.name);
        self.broadcast(
            ServerMessage::ClientDisconnected(Disconnected { name: quit.name, exit: true }),
            Some(conn),
        );
        self.try_start();
        Flow::Close
    }

    /// Take a player who left for good out of the running match.
    fn forfeit(&mut self, name: &str) {
        if self.state != SessionState::Playing {
            return;
        }
        let Some(energy) = self.assignment.iter().find(|(n, _)| n == name).map(|(_, e)| *e) else {
            return;
        };
        let Some(board) = self.board.as_mut() else {
            return;
        };
        if !board.forfeit(energy) {
            return;
        }
        let finished = board.phase() == GamePhase::Finish;
        let winner = board.winner();
        board.take_events();
        info!(%name, %energy, "player forfeited");
        self.history.push(MatchRecord::Left(Disconnected { name: name.to_string(), exit: true }));

        if finished {
            self.finish_match(winner);
        }
    }

    fn finish_match(&mut self, winner: Option<Energy>) {
        let winner_name = self
            .assignment
            .iter()
            .find(|(_, e)| Some(*e) == winner)
            .map(|(n, _)| n.clone());
        info!(winner = ?winner_name, "game over");
        self.state = SessionState::Lobby;
    }

    // =========================================================================
    // MATCH START
    // =========================================================================

    /// Start once every registered player is connected and ready.
    ///
    /// A retained slot holds the lobby until its player comes back.
    fn try_start(&mut self) {
        if self.state != SessionState::Lobby || self.players.len() < self.config.min_players {
            return;
        }
        if !self.players.values().all(|p| p.ready && p.is_connected()) {
            return;
        }
        if let Err(e) = self.start_match() {
            error!(error = %e, "failed to start match");
        }
    }

    /// Start a match with every registered player.
    ///
    /// Energies are shuffled with a seed derived from the server seed, a
    /// fresh match id and the sorted player names, then assigned in name
    /// order. Turn order follows the assignment.
    pub fn start_match(&mut self) -> Result<(), SessionError> {
        let names: Vec<String> = self.players.keys().cloned().collect();
        if names.len() < self.config.min_players {
            return Err(SessionError::NotEnoughPlayers { needed: self.config.min_players, have: names.len() });
        }

        let match_id = uuid::Uuid::new_v4();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let seed = derive_match_seed(self.config.server_seed, match_id.as_bytes(), &refs);
        let mut energies = P_ENERGY;
        DeterministicRng::new(seed).shuffle(&mut energies);
        let assignment: Vec<(String, Energy)> = names.into_iter().zip(energies).collect();

        let mut board = GameBoard::new(BoardConfig {
            seed,
            shuffle_turns: false,
            ..self.config.board.clone()
        });
        for (_, energy) in &assignment {
            board.join(*energy)?;
        }
        board.restart(&self.scheme, Mode::for_scheme(&self.scheme))?;
        board.finish_build();
        if board.phase() != GamePhase::Waiting {
            return Err(SessionError::BoardNotPlayable(board.phase()));
        }
        board.take_events();

        for player in self.players.values_mut() {
            player.ready = false;
            player.energy = assignment.iter().find(|(n, _)| *n == player.name).map(|(_, e)| *e);
        }
        info!(match_id = %match_id, players = assignment.len(), "match started");

        self.board = Some(board);
        self.match_id = Some(match_id.into_bytes());
        self.assignment = assignment;
        self.history.clear();
        self.state = SessionState::Playing;
        self.broadcast(ServerMessage::Start(Start { players: self.assignment.clone() }), None);
        Ok(())
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn send(&self, conn: ConnectionId, msg: ServerMessage) {
        if let Some(connection) = self.connections.get(&conn) {
            if connection.sender.send(msg).is_err() {
                debug!(conn, "send to closed connection");
            }
        }
    }

    /// Send to every logged-in connection except `exclude`.
    fn broadcast(&self, msg: ServerMessage, exclude: Option<ConnectionId>) {
        for (id, connection) in &self.connections {
            if Some(*id) == exclude || connection.name.is_none() {
                continue;
            }
            let _ = connection.sender.send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::hash_password;
    use crate::network::protocol::Code;

    type Rx = mpsc::UnboundedReceiver<ServerMessage>;

    fn create_test_session(auth: AuthConfig) -> ServerSession {
        ServerSession::new(SessionConfig::default(), auth, Scheme::rectangle(2, 2))
    }

    fn drain(rx: &mut Rx) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn codes(rx: &mut Rx) -> Vec<Code> {
        drain(rx).iter().map(ServerMessage::code).collect()
    }

    fn hello(name: &str) -> ClientMessage {
        ClientMessage::Hello(Hello { name: name.into(), password: None, account_password: None })
    }

    fn login(session: &mut ServerSession, name: &str) -> (ConnectionId, Rx) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = session.connect(tx);
        assert_eq!(session.handle(conn, hello(name)), Flow::Continue);
        drain(&mut rx);
        (conn, rx)
    }

    fn ready(session: &mut ServerSession, conn: ConnectionId, name: &str) {
        session.handle(conn, ClientMessage::Ready(Named { name: name.into() }));
    }

    fn started(session: &mut ServerSession) -> ((ConnectionId, Rx), (ConnectionId, Rx)) {
        let (a, mut rx_a) = login(session, "alice");
        let (b, mut rx_b) = login(session, "bob");
        ready(session, a, "alice");
        ready(session, b, "bob");
        drain(&mut rx_a);
        drain(&mut rx_b);
        ((a, rx_a), (b, rx_b))
    }

    fn player_for(session: &ServerSession, energy: Energy) -> String {
        session.assignment().iter().find(|(_, e)| *e == energy).map(|(n, _)| n.clone()).unwrap()
    }

    fn energy_of(session: &ServerSession, name: &str) -> Energy {
        session.assignment().iter().find(|(n, _)| n == name).map(|(_, e)| *e).unwrap()
    }

    /// alice, bob and carol in a running match; alice moves first.
    fn started_three(session: &mut ServerSession) -> Vec<(ConnectionId, Rx)> {
        let mut out: Vec<(ConnectionId, Rx)> =
            ["alice", "bob", "carol"].iter().map(|name| login(session, name)).collect();
        for ((conn, _), name) in out.iter().zip(["alice", "bob", "carol"]) {
            ready(session, *conn, name);
        }
        for (_, rx) in &mut out {
            drain(rx);
        }
        assert_eq!(session.state(), SessionState::Playing);
        out
    }

    #[tokio::test]
    async fn test_wrong_server_password_closes() {
        let mut session = create_test_session(AuthConfig::with_password("pw"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = session.connect(tx);

        let flow = session.handle(conn, hello("mallory"));
        assert_eq!(flow, Flow::Close);
        assert_eq!(drain(&mut rx), vec![ServerMessage::WrongPassword]);
        assert_eq!(session.player_count(), 0);
    }

    #[tokio::test]
    async fn test_correct_server_password_welcomes() {
        let mut session = create_test_session(AuthConfig::with_password("pw"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = session.connect(tx);

        let msg = ClientMessage::Hello(Hello {
            name: "alice".into(),
            password: Some(hash_password("pw")),
            account_password: Some(hash_password("a")),
        });
        assert_eq!(session.handle(conn, msg), Flow::Continue);
        match drain(&mut rx).as_slice() {
            [ServerMessage::Welcome(w)] => {
                assert_eq!(w.scheme, Scheme::rectangle(2, 2));
                assert!(w.players.is_empty());
            }
            other => panic!("unexpected replies: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_account_password_pinned() {
        let mut session = create_test_session(AuthConfig::open());
        let pinned = ClientMessage::Hello(Hello {
            name: "alice".into(),
            password: None,
            account_password: Some(hash_password("one")),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = session.connect(tx);
        session.handle(first, pinned);
        session.disconnect(first);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let second = session.connect(tx);
        let wrong = ClientMessage::Hello(Hello {
            name: "alice".into(),
            password: None,
            account_password: Some(hash_password("two")),
        });
        assert_eq!(session.handle(second, wrong), Flow::Close);
        assert_eq!(drain(&mut rx), vec![ServerMessage::WrongAccountPassword]);
    }

    #[tokio::test]
    async fn test_join_announces_and_snapshots() {
        let mut session = create_test_session(AuthConfig::open());
        let (_, mut rx_a) = login(&mut session, "alice");

        let (tx, mut rx_b) = mpsc::unbounded_channel();
        let b = session.connect(tx);
        session.handle(b, hello("bob"));

        match drain(&mut rx_b).as_slice() {
            [ServerMessage::Welcome(w)] => assert!(w.players.contains_key("alice")),
            other => panic!("unexpected replies: {other:?}"),
        }
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::NewPlayer(Named { name: "bob".into() })]);
    }

    #[tokio::test]
    async fn test_heartbeat_acked_before_login() {
        let mut session = create_test_session(AuthConfig::open());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = session.connect(tx);
        session.handle(conn, ClientMessage::Heartbeat);
        assert_eq!(codes(&mut rx), vec![Code::Ack]);
    }

    #[tokio::test]
    async fn test_move_relayed_except_sender() {
        let mut session = create_test_session(AuthConfig::open());
        let (a, mut rx_a) = login(&mut session, "alice");
        let (_, mut rx_b) = login(&mut session, "bob");
        drain(&mut rx_a);

        let m = Move { name: "alice".into(), position: (4.0, 2.0), time: 1.5 };
        session.handle(a, ClientMessage::Move(m.clone()));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::PlayerMove(m)]);
        assert_eq!(session.player("alice").unwrap().position, (4.0, 2.0));

        // Spoofed name is ignored.
        let spoof = Move { name: "bob".into(), position: (9.0, 9.0), time: 2.0 };
        session.handle(a, ClientMessage::Move(spoof));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_all_ready_starts_match() {
        let mut session = create_test_session(AuthConfig::open());
        let (a, mut rx_a) = login(&mut session, "alice");
        let (b, mut rx_b) = login(&mut session, "bob");
        drain(&mut rx_a);

        ready(&mut session, a, "alice");
        assert_eq!(session.state(), SessionState::Lobby);
        ready(&mut session, b, "bob");
        assert_eq!(session.state(), SessionState::Playing);

        let start_a = drain(&mut rx_a);
        assert_eq!(start_a, drain(&mut rx_b));
        match start_a.as_slice() {
            [ServerMessage::Start(s)] => {
                assert_eq!(s.players.len(), 2);
                assert_eq!(s.players[0].0, "alice");
                assert_eq!(s.players[1].0, "bob");
                assert_ne!(s.players[0].1, s.players[1].1);
                assert!(s.players.iter().all(|(_, e)| e.is_player()));
            }
            other => panic!("unexpected replies: {other:?}"),
        }
        assert_eq!(session.board().unwrap().phase(), GamePhase::Waiting);
    }

    #[tokio::test]
    async fn test_single_player_cannot_start() {
        let mut session = create_test_session(AuthConfig::open());
        let (a, _rx) = login(&mut session, "alice");
        ready(&mut session, a, "alice");
        assert_eq!(session.state(), SessionState::Lobby);
        assert!(matches!(session.start_match(), Err(SessionError::NotEnoughPlayers { .. })));
    }

    #[tokio::test]
    async fn test_hits_validated_before_relay() {
        let mut session = create_test_session(AuthConfig::open());
        let ((a, mut rx_a), (b, mut rx_b)) = started(&mut session);
        let first = session.board().unwrap().current_player().unwrap();
        let first_name = player_for(&session, first);
        let (mover, waiting) = if first_name == "alice" { (a, b) } else { (b, a) };
        let waiting_name = if first_name == "alice" { "bob" } else { "alice" };

        // Out of turn: dropped.
        session.handle(waiting, ClientMessage::Hit(Hit { name: waiting_name.into(), hit: (0, 0) }));
        assert!(drain(&mut rx_a).is_empty());

        let hit = Hit { name: first_name.clone(), hit: (0, 0) };
        session.handle(mover, ClientMessage::Hit(hit.clone()));
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::PlayerHit(hit.clone())]);
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::PlayerHit(hit)]);
    }

    #[tokio::test]
    async fn test_rejoin_replays_match() {
        let mut session = create_test_session(AuthConfig::open());
        let ((a, mut rx_a), (b, _rx_b)) = started(&mut session);
        let first = session.board().unwrap().current_player().unwrap();
        let first_name = player_for(&session, first);
        let mover = if first_name == "alice" { a } else { b };
        session.handle(mover, ClientMessage::Hit(Hit { name: first_name.clone(), hit: (1, 1) }));

        session.disconnect(b);
        assert!(!session.player("bob").unwrap().is_connected());
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(session.board().unwrap().players().len(), 2);
        drain(&mut rx_a);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let again = session.connect(tx);
        session.handle(again, hello("bob"));
        assert_eq!(codes(&mut rx), vec![Code::Welcome, Code::Start, Code::PlayerHit]);
        assert!(session.player("bob").unwrap().is_connected());
        // A returning name is not announced as new.
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_lobby_rejoin_not_announced() {
        let mut session = create_test_session(AuthConfig::open());
        let (_, mut rx_a) = login(&mut session, "alice");
        let (b, _) = login(&mut session, "bob");
        drain(&mut rx_a);

        session.disconnect(b);
        login(&mut session, "bob");
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::ClientDisconnected(Disconnected { name: "bob".into(), exit: false })]
        );

        login(&mut session, "carol");
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::NewPlayer(Named { name: "carol".into() })]);
    }

    #[tokio::test]
    async fn test_ready_waits_for_retained_slot() {
        let mut session = create_test_session(AuthConfig::open());
        let (a, _rx_a) = login(&mut session, "alice");
        let (b, _rx_b) = login(&mut session, "bob");
        let (c, _rx_c) = login(&mut session, "carol");

        session.disconnect(c);
        assert_eq!(session.player_count(), 3);
        ready(&mut session, a, "alice");
        ready(&mut session, b, "bob");
        assert_eq!(session.state(), SessionState::Lobby);

        let (c, _rx_c) = login(&mut session, "carol");
        assert_eq!(session.state(), SessionState::Lobby);
        ready(&mut session, c, "carol");
        assert_eq!(session.state(), SessionState::Playing);
        let names: Vec<&str> = session.assignment().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_ready_survives_drop_and_rejoin_starts() {
        let mut session = create_test_session(AuthConfig::open());
        let (a, _rx_a) = login(&mut session, "alice");
        let (b, _rx_b) = login(&mut session, "bob");
        let (c, _rx_c) = login(&mut session, "carol");

        ready(&mut session, c, "carol");
        session.disconnect(c);
        assert!(session.player("carol").unwrap().ready);
        ready(&mut session, a, "alice");
        ready(&mut session, b, "bob");
        assert_eq!(session.state(), SessionState::Lobby);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let again = session.connect(tx);
        session.handle(again, hello("carol"));
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(session.assignment().len(), 3);
        assert_eq!(codes(&mut rx), vec![Code::Welcome, Code::Start]);
    }

    #[tokio::test]
    async fn test_quit_during_match_passes_turn() {
        let mut session = create_test_session(AuthConfig::open());
        let mut conns = started_three(&mut session);
        let alice = energy_of(&session, "alice");
        let bob = energy_of(&session, "bob");
        assert_eq!(session.board().unwrap().current_player(), Some(alice));

        let flow = session.handle(conns[0].0, ClientMessage::Quit(Named { name: "alice".into() }));
        assert_eq!(flow, Flow::Close);
        session.disconnect(conns[0].0);

        assert_eq!(session.state(), SessionState::Playing);
        let board = session.board().unwrap();
        assert_eq!(board.current_player(), Some(bob));
        assert_eq!(board.players().len(), 2);
        assert!(!board.players().contains(alice));
        let gone = ServerMessage::ClientDisconnected(Disconnected { name: "alice".into(), exit: true });
        assert_eq!(drain(&mut conns[1].1), vec![gone.clone()]);
        assert_eq!(drain(&mut conns[2].1), vec![gone]);

        let hit = Hit { name: "bob".into(), hit: (0, 0) };
        session.handle(conns[1].0, ClientMessage::Hit(hit.clone()));
        assert_eq!(drain(&mut conns[2].1), vec![ServerMessage::PlayerHit(hit)]);
        assert_eq!(session.board().unwrap().current_player(), Some(energy_of(&session, "carol")));
    }

    #[tokio::test]
    async fn test_quit_ends_two_player_match() {
        let mut session = create_test_session(AuthConfig::open());
        let ((a, _rx_a), (_, mut rx_b)) = started(&mut session);
        let bob = energy_of(&session, "bob");

        session.handle(a, ClientMessage::Quit(Named { name: "alice".into() }));
        assert_eq!(session.state(), SessionState::Lobby);
        let board = session.board().unwrap();
        assert_eq!(board.phase(), GamePhase::Finish);
        assert_eq!(board.winner(), Some(bob));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::ClientDisconnected(Disconnected { name: "alice".into(), exit: true })]
        );
    }

    #[tokio::test]
    async fn test_drop_without_rejoin_forfeits() {
        let config = SessionConfig { allow_rejoin: false, ..SessionConfig::default() };
        let mut session = ServerSession::new(config, AuthConfig::open(), Scheme::rectangle(2, 2));
        let ((_, _rx_a), (b, _rx_b)) = started(&mut session);
        let alice = energy_of(&session, "alice");

        session.disconnect(b);
        assert_eq!(session.state(), SessionState::Lobby);
        assert_eq!(session.board().unwrap().winner(), Some(alice));
    }

    #[tokio::test]
    async fn test_rejoin_replays_forfeit() {
        let mut session = create_test_session(AuthConfig::open());
        let conns = started_three(&mut session);
        session.handle(conns[0].0, ClientMessage::Quit(Named { name: "alice".into() }));
        session.handle(conns[1].0, ClientMessage::Hit(Hit { name: "bob".into(), hit: (0, 0) }));
        session.disconnect(conns[2].0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let again = session.connect(tx);
        session.handle(again, hello("carol"));
        assert_eq!(
            codes(&mut rx),
            vec![Code::Welcome, Code::Start, Code::ClientDisconnected, Code::PlayerHit]
        );
        assert_eq!(session.board().unwrap().current_player(), Some(energy_of(&session, "carol")));
    }

    #[tokio::test]
    async fn test_disconnect_without_rejoin_removes() {
        let config = SessionConfig { allow_rejoin: false, ..SessionConfig::default() };
        let mut session = ServerSession::new(config, AuthConfig::open(), Scheme::rectangle(2, 2));
        let (_, mut rx_a) = login(&mut session, "alice");
        let (b, _) = login(&mut session, "bob");
        drain(&mut rx_a);

        session.disconnect(b);
        assert_eq!(session.player_count(), 1);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::ClientDisconnected(Disconnected { name: "bob".into(), exit: true })]
        );
    }

    #[tokio::test]
    async fn test_quit_is_permanent() {
        let mut session = create_test_session(AuthConfig::open());
        let (_, mut rx_a) = login(&mut session, "alice");
        let (b, _) = login(&mut session, "bob");
        drain(&mut rx_a);

        let flow = session.handle(b, ClientMessage::Quit(Named { name: "bob".into() }));
        assert_eq!(flow, Flow::Close);
        session.disconnect(b);

        assert!(session.player("bob").is_none());
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::ClientDisconnected(Disconnected { name: "bob".into(), exit: true })]
        );
    }

    #[tokio::test]
    async fn test_live_name_cannot_be_taken() {
        let mut session = create_test_session(AuthConfig::open());
        let _alice = login(&mut session, "alice");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = session.connect(tx);
        assert_eq!(session.handle(conn, hello("alice")), Flow::Close);
        assert!(drain(&mut rx).is_empty());
    }
}
