//! Network Layer
//!
//! Line-delimited JSON protocol, the authoritative TCP server and the
//! client runtime. This layer is **non-deterministic**; every rule runs
//! through `game/`.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod server;
pub mod client;
pub mod mirror;

pub use auth::{AccountRegistry, AuthConfig, AuthError};
pub use protocol::{ClientMessage, Code, ProtocolError, ServerMessage};
pub use session::{ConnectionId, Flow, ServerSession, SessionConfig, SessionError, SessionState};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use client::{ClientConfig, ClientError, NetClient};
pub use mirror::{MatchMirror, MirrorError};
