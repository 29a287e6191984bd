//! Protocol Messages
//!
//! Wire format for client-server communication over TCP.
//! One JSON object per line; every object carries an integer `code`
//! and the payload fields of that code next to it:
//!
//! ```text
//! {"code":110,"hit":[1,2],"name":"alice"}\n
//! ```

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::game::cell::Pos;
use crate::game::energy::Energy;
use crate::game::scheme::Scheme;

// =============================================================================
// MESSAGE CODES
// =============================================================================

/// Message codes. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Code {
    /// C→S join request.
    Hello = 10,
    /// S→C join accepted.
    Welcome = 20,
    /// S→C someone joined.
    NewPlayer = 30,
    /// S→C someone left.
    ClientDisconnected = 40,
    /// C→S liveness ping.
    Heartbeat = 50,
    /// S→C liveness reply.
    Ack = 60,
    /// C→S avatar position.
    Move = 100,
    /// C→S cell hit.
    Hit = 110,
    /// C→S pass (accepted, no effect).
    Pass = 120,
    /// C→S permanent leave.
    Quit = 130,
    /// C→S ready for the next match.
    Ready = 140,
    /// S→C relayed position.
    PlayerMove = 200,
    /// S→C relayed hit.
    PlayerHit = 210,
    /// S→C wrong server password.
    WrongPassword = 300,
    /// S→C wrong account password.
    WrongPassword2 = 301,
    /// S→C match start with energy assignment.
    Start = 400,
}

impl Code {
    /// All codes in wire order.
    pub const ALL: [Code; 16] = [
        Code::Hello,
        Code::Welcome,
        Code::NewPlayer,
        Code::ClientDisconnected,
        Code::Heartbeat,
        Code::Ack,
        Code::Move,
        Code::Hit,
        Code::Pass,
        Code::Quit,
        Code::Ready,
        Code::PlayerMove,
        Code::PlayerHit,
        Code::WrongPassword,
        Code::WrongPassword2,
        Code::Start,
    ];

    /// Wire value.
    pub fn value(self) -> u16 {
        self as u16
    }

    /// Decode a wire value.
    pub fn from_value(value: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| u64::from(c.value()) == value)
    }
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Line is not a JSON object.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// Object has no integer `code`.
    #[error("missing message code")]
    MissingCode,
    /// Code not in the table.
    #[error("unknown message code {0}")]
    UnknownCode(u64),
    /// Code valid but travels the other way.
    #[error("unexpected {0:?} in this direction")]
    WrongDirection(Code),
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Player name; the registry key.
    pub name: String,
    /// Hex SHA-256 of the server password.
    #[serde(default)]
    pub password: Option<String>,
    /// Hex SHA-256 of the account password.
    #[serde(default)]
    pub account_password: Option<String>,
}

/// A payload that only names a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named {
    /// Player name.
    pub name: String,
}

/// Avatar position update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    /// Player name.
    pub name: String,
    /// World position.
    #[serde(rename = "move")]
    pub position: (f64, f64),
    /// Sender clock, unix seconds.
    pub time: f64,
}

/// Cell hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    /// Player name.
    pub name: String,
    /// `[row, col]`.
    pub hit: Pos,
}

/// Registry entry sent in `WELCOME`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Player name.
    pub name: String,
    /// Last reported position.
    pub position: (f64, f64),
}

/// Join accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    /// Board topology.
    pub scheme: Scheme,
    /// Other registered players by name.
    pub players: BTreeMap<String, PlayerInfo>,
}

/// Someone left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnected {
    /// Player name.
    pub name: String,
    /// True when the slot is gone for good.
    #[serde(default)]
    pub exit: bool,
}

/// Match start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Start {
    /// `[name, energy]` pairs.
    pub players: Vec<(String, Energy)>,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join with credentials.
    Hello(Hello),
    /// Liveness ping.
    Heartbeat,
    /// Avatar moved.
    Move(Move),
    /// Cell hit.
    Hit(Hit),
    /// Pass the turn.
    Pass(Named),
    /// Leave for good.
    Quit(Named),
    /// Ready for the next match.
    Ready(Named),
}

impl ClientMessage {
    /// Message code.
    pub fn code(&self) -> Code {
        match self {
            ClientMessage::Hello(_) => Code::Hello,
            ClientMessage::Heartbeat => Code::Heartbeat,
            ClientMessage::Move(_) => Code::Move,
            ClientMessage::Hit(_) => Code::Hit,
            ClientMessage::Pass(_) => Code::Pass,
            ClientMessage::Quit(_) => Code::Quit,
            ClientMessage::Ready(_) => Code::Ready,
        }
    }

    /// Player named by the payload, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            ClientMessage::Hello(p) => Some(&p.name),
            ClientMessage::Move(p) => Some(&p.name),
            ClientMessage::Hit(p) => Some(&p.name),
            ClientMessage::Pass(p) | ClientMessage::Quit(p) | ClientMessage::Ready(p) => Some(&p.name),
            ClientMessage::Heartbeat => None,
        }
    }

    /// Serialize to a JSON object string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let code = self.code();
        match self {
            ClientMessage::Hello(p) => envelope(code, p),
            ClientMessage::Heartbeat => envelope(code, &()),
            ClientMessage::Move(p) => envelope(code, p),
            ClientMessage::Hit(p) => envelope(code, p),
            ClientMessage::Pass(p) | ClientMessage::Quit(p) | ClientMessage::Ready(p) => envelope(code, p),
        }
    }

    /// Deserialize from one line.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let (code, value) = open(s)?;
        Ok(match code {
            Code::Hello => ClientMessage::Hello(payload(value)?),
            Code::Heartbeat => ClientMessage::Heartbeat,
            Code::Move => ClientMessage::Move(payload(value)?),
            Code::Hit => ClientMessage::Hit(payload(value)?),
            Code::Pass => ClientMessage::Pass(payload(value)?),
            Code::Quit => ClientMessage::Quit(payload(value)?),
            Code::Ready => ClientMessage::Ready(payload(value)?),
            other => return Err(ProtocolError::WrongDirection(other)),
        })
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Join accepted.
    Welcome(Welcome),
    /// Someone joined.
    NewPlayer(Named),
    /// Someone left.
    ClientDisconnected(Disconnected),
    /// Heartbeat reply.
    Ack,
    /// Relayed move.
    PlayerMove(Move),
    /// Relayed, validated hit.
    PlayerHit(Hit),
    /// Wrong server password; connection closes.
    WrongPassword,
    /// Wrong account password; connection closes.
    WrongAccountPassword,
    /// Match start.
    Start(Start),
}

impl ServerMessage {
    /// Message code.
    pub fn code(&self) -> Code {
        match self {
            ServerMessage::Welcome(_) => Code::Welcome,
            ServerMessage::NewPlayer(_) => Code::NewPlayer,
            ServerMessage::ClientDisconnected(_) => Code::ClientDisconnected,
            ServerMessage::Ack => Code::Ack,
            ServerMessage::PlayerMove(_) => Code::PlayerMove,
            ServerMessage::PlayerHit(_) => Code::PlayerHit,
            ServerMessage::WrongPassword => Code::WrongPassword,
            ServerMessage::WrongAccountPassword => Code::WrongPassword2,
            ServerMessage::Start(_) => Code::Start,
        }
    }

    /// Serialize to a JSON object string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let code = self.code();
        match self {
            ServerMessage::Welcome(p) => envelope(code, p),
            ServerMessage::NewPlayer(p) => envelope(code, p),
            ServerMessage::ClientDisconnected(p) => envelope(code, p),
            ServerMessage::PlayerMove(p) => envelope(code, p),
            ServerMessage::PlayerHit(p) => envelope(code, p),
            ServerMessage::Start(p) => envelope(code, p),
            ServerMessage::Ack | ServerMessage::WrongPassword | ServerMessage::WrongAccountPassword => {
                envelope(code, &())
            }
        }
    }

    /// Deserialize from one line.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let (code, value) = open(s)?;
        Ok(match code {
            Code::Welcome => ServerMessage::Welcome(payload(value)?),
            Code::NewPlayer => ServerMessage::NewPlayer(payload(value)?),
            Code::ClientDisconnected => ServerMessage::ClientDisconnected(payload(value)?),
            Code::Ack => ServerMessage::Ack,
            Code::PlayerMove => ServerMessage::PlayerMove(payload(value)?),
            Code::PlayerHit => ServerMessage::PlayerHit(payload(value)?),
            Code::WrongPassword => ServerMessage::WrongPassword,
            Code::WrongPassword2 => ServerMessage::WrongAccountPassword,
            Code::Start => ServerMessage::Start(payload(value)?),
            other => return Err(ProtocolError::WrongDirection(other)),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

/// Payload fields plus `code`.
fn envelope<T: Serialize>(code: Code, body: &T) -> Result<String, serde_json::Error> {
    let mut map = match serde_json::to_value(body)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.insert("code".to_string(), Value::from(code.value()));
    serde_json::to_string(&Value::Object(map))
}

fn open(line: &str) -> Result<(Code, Value), ProtocolError> {
    let value: Value = serde_json::from_str(line.trim())?;
    let raw = value.get("code").and_then(Value::as_u64).ok_or(ProtocolError::MissingCode)?;
    let code = Code::from_value(raw).ok_or(ProtocolError::UnknownCode(raw))?;
    Ok((code, value))
}

fn payload<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    Ok(serde_json::from_value(value)?)
}
