//! TCP Game Server
//!
//! Newline-delimited JSON over TCP. Each accepted socket gets a reader task
//! and a writer task; every message is applied to the shared
//! [`ServerSession`] under a write lock, so handlers never interleave.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::game::scheme::{Scheme, SchemeError, SchemeFile};
use crate::network::auth::AuthConfig;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{Flow, ServerSession, SessionConfig};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 12345;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Server password gate.
    pub auth: AuthConfig,
    /// Close a connection after this long without a line. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Retain dropped players for rejoin.
    pub allow_rejoin: bool,
    /// Board served to every client.
    pub scheme: Scheme,
    /// Mixed into every match seed.
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            auth: AuthConfig::open(),
            idle_timeout: Some(Duration::from_secs(15)),
            allow_rejoin: true,
            scheme: Scheme::rectangle(6, 6),
            seed: 0,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// Reads `CR_BIND`, `CR_PASSWORD`, `CR_SCHEME`, `CR_TIMEOUT_SECS`,
    /// `CR_ALLOW_REJOIN` and `CR_SEED`; unset variables keep the defaults.
    pub fn from_env() -> Result<Self, GameServerError> {
        let mut config = Self {
            auth: AuthConfig::from_env(),
            ..Self::default()
        };

        if let Some(bind) = env_var("CR_BIND") {
            config.bind_addr = bind
                .parse()
                .map_err(|_| GameServerError::Config(format!("CR_BIND: invalid address {bind}")))?;
        }
        if let Some(path) = env_var("CR_SCHEME") {
            config.scheme = SchemeFile::load(&path)?.scheme;
        }
        if let Some(secs) = env_var("CR_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| GameServerError::Config(format!("CR_TIMEOUT_SECS: not a number: {secs}")))?;
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(flag) = env_var("CR_ALLOW_REJOIN") {
            config.allow_rejoin = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(seed) = env_var("CR_SEED") {
            config.seed = seed
                .parse()
                .map_err(|_| GameServerError::Config(format!("CR_SEED: not a number: {seed}")))?;
        }
        Ok(config)
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            allow_rejoin: self.allow_rejoin,
            server_seed: self.seed,
            ..SessionConfig::default()
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind or accept.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Board scheme could not be loaded.
    #[error("Scheme error: {0}")]
    Scheme(#[from] SchemeError),

    /// Bad environment value.
    #[error("Configuration error: {0}")]
    Config(String),
}

// =============================================================================
// SERVER
// =============================================================================

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Authoritative state.
    session: Arc<RwLock<ServerSession>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let session = ServerSession::new(config.session_config(), config.auth.clone(), config.scheme.clone());

        Self {
            config,
            session: Arc::new(RwLock::new(session)),
            shutdown_tx,
        }
    }

    /// Shared session, for inspection.
    pub fn session(&self) -> Arc<RwLock<ServerSession>> {
        self.session.clone()
    }

    /// Bind and run until [`shutdown`](Self::shutdown).
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            password = self.config.auth.is_configured(),
            rejoin = self.config.allow_rejoin,
            "Game server listening on {}",
            self.config.bind_addr
        );
        self.serve(listener).await
    }

    /// Accept on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Spawn the reader and writer tasks for one socket.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let session = self.session.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
            let conn = session.write().await.connect(msg_tx);

            // Ends once the session drops the sender and the queue is empty.
            let writer_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let mut line = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    line.push('\n');
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                }
                let _ = writer.shutdown().await;
            });

            loop {
                let next = tokio::select! {
                    line = next_line(&mut lines, idle_timeout) => line,
                    _ = shutdown_rx.recv() => break,
                };
                let line = match next {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("Client {} closed the connection", addr);
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        info!("Client {} idle, closing", addr);
                        break;
                    }
                    Err(e) => {
                        warn!("Read error for {}: {}", addr, e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let msg = match ClientMessage::from_json(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("Invalid message from {}: {}", addr, e);
                        continue;
                    }
                };
                if session.write().await.handle(conn, msg) == Flow::Close {
                    break;
                }
            }

            session.write().await.disconnect(conn);
            let _ = writer_task.await;
            info!("Connection {} closed", addr);
        });
    }

    /// Signal the accept loop and every connection task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get the number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.session.read().await.connection_count()
    }
}

async fn next_line(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<String>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, lines.next_line())
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "idle timeout"))?,
        None => lines.next_line().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::hash_password;
    use crate::network::protocol::{Code, Hello, Named};
    use tokio::net::tcp::OwnedWriteHalf;

    struct TestClient {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self { lines: BufReader::new(reader).lines(), writer }
        }

        async fn send(&mut self, msg: ClientMessage) {
            let mut line = msg.to_json().unwrap();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Option<ServerMessage> {
            let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .unwrap()
                .unwrap()?;
            Some(ServerMessage::from_json(&line).unwrap())
        }
    }

    fn hello(name: &str, password: Option<&str>) -> ClientMessage {
        ClientMessage::Hello(Hello {
            name: name.into(),
            password: password.map(hash_password),
            account_password: None,
        })
    }

    async fn start_server(config: ServerConfig) -> (Arc<GameServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(config));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (server, addr)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(15)));
        assert!(config.allow_rejoin);
        assert!(!config.auth.is_configured());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig::default());
        assert_eq!(server.connection_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_password_then_closed() {
        let config = ServerConfig {
            auth: AuthConfig::with_password("secret"),
            ..ServerConfig::default()
        };
        let (server, addr) = start_server(config).await;

        let mut client = TestClient::connect(addr).await;
        client.send(hello("mallory", Some("guess"))).await;
        assert_eq!(client.recv().await, Some(ServerMessage::WrongPassword));
        assert_eq!(client.recv().await, None);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_heartbeat_and_match_start() {
        let (server, addr) = start_server(ServerConfig::default()).await;

        let mut alice = TestClient::connect(addr).await;
        alice.send(ClientMessage::Heartbeat).await;
        assert_eq!(alice.recv().await, Some(ServerMessage::Ack));

        alice.send(hello("alice", None)).await;
        assert_eq!(alice.recv().await.map(|m| m.code()), Some(Code::Welcome));

        let mut bob = TestClient::connect(addr).await;
        bob.send(hello("bob", None)).await;
        assert_eq!(bob.recv().await.map(|m| m.code()), Some(Code::Welcome));
        assert_eq!(alice.recv().await, Some(ServerMessage::NewPlayer(Named { name: "bob".into() })));

        alice.send(ClientMessage::Ready(Named { name: "alice".into() })).await;
        bob.send(ClientMessage::Ready(Named { name: "bob".into() })).await;

        let start_a = alice.recv().await;
        let start_b = bob.recv().await;
        assert_eq!(start_a.as_ref().map(|m| m.code()), Some(Code::Start));
        assert_eq!(start_a, start_b);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_idle_connection_closed() {
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..ServerConfig::default()
        };
        let (server, addr) = start_server(config).await;

        let mut client = TestClient::connect(addr).await;
        client.send(hello("sleepy", None)).await;
        assert_eq!(client.recv().await.map(|m| m.code()), Some(Code::Welcome));
        assert_eq!(client.recv().await, None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count().await, 0);
        server.shutdown();
    }
}
