//! Client Runtime
//!
//! One background thread owns the socket and drives a current-thread tokio
//! runtime. The foreground queues [`ClientMessage`]s and drains received
//! [`ServerMessage`]s; neither side blocks on the other.
//!
//! A heartbeat goes out every `heartbeat_ticks` poll ticks. If the `ACK`
//! for the previous one has not arrived by then, the connection is closed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::network::protocol::{ClientMessage, Move, ServerMessage};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub addr: String,
    /// Connection attempts before giving up.
    pub attempts: u32,
    /// Timeout of a single attempt.
    pub connect_timeout: Duration,
    /// Poll tick of the network loop.
    pub poll_interval: Duration,
    /// Poll ticks between heartbeats.
    pub heartbeat_ticks: u32,
}

impl ClientConfig {
    /// Defaults for `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            attempts: 4,
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            heartbeat_ticks: 40,
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Every attempt was refused or timed out.
    #[error("Could not connect to {addr} after {attempts} attempts")]
    ConnectFailed {
        /// Target address.
        addr: String,
        /// Attempts made.
        attempts: u32,
    },

    /// Thread or runtime setup failed.
    #[error("Client runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// The connection is gone.
    #[error("Connection closed")]
    Closed,
}

/// Build a `MOVE` stamped with the current wall clock.
pub fn move_message(name: &str, position: (f64, f64)) -> ClientMessage {
    let time = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    ClientMessage::Move(Move { name: name.to_string(), position, time })
}

// =============================================================================
// CLIENT
// =============================================================================

/// Handle to a background network connection.
pub struct NetClient {
    input_tx: mpsc::UnboundedSender<ClientMessage>,
    updates: Arc<Mutex<VecDeque<ServerMessage>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NetClient {
    /// Connect, retrying up to `config.attempts` times.
    ///
    /// Blocks the calling thread until the connection is up or every
    /// attempt failed.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let updates = Arc::new(Mutex::new(VecDeque::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), ClientError>>();

        let thread_updates = updates.clone();
        let thread_running = running.clone();
        let thread = std::thread::Builder::new().name("net-client".into()).spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    thread_running.store(false, Ordering::Release);
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };
            runtime.block_on(async move {
                let stream = match connect_with_retry(&config).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        thread_running.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_loop(stream, &config, input_rx, thread_updates, thread_running).await;
            });
        })?;

        let handshake = ready_rx.recv().unwrap_or(Err(ClientError::Closed));
        let mut client = Self { input_tx, updates, running, thread: Some(thread) };
        match handshake {
            Ok(()) => Ok(client),
            Err(e) => {
                client.close();
                Err(e)
            }
        }
    }

    /// Whether the connection is still up.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue a message for sending.
    pub fn send_input(&self, msg: ClientMessage) -> Result<(), ClientError> {
        if !self.is_running() {
            return Err(ClientError::Closed);
        }
        self.input_tx.send(msg).map_err(|_| ClientError::Closed)
    }

    /// Take everything received since the last call.
    pub fn get_updates(&self) -> Vec<ServerMessage> {
        let mut queue = match self.updates.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.drain(..).collect()
    }

    /// Stop the network thread and wait for it.
    ///
    /// The loop notices within one poll interval.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("network thread panicked");
            }
        }
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn connect_with_retry(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    for attempt in 1..=config.attempts {
        match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.addr)).await {
            Ok(Ok(stream)) => {
                info!(addr = %config.addr, attempt, "connected");
                return Ok(stream);
            }
            Ok(Err(e)) => warn!(addr = %config.addr, attempt, error = %e, "connect failed"),
            Err(_) => warn!(addr = %config.addr, attempt, "connect timed out"),
        }
        if attempt < config.attempts {
            tokio::time::sleep(config.poll_interval).await;
        }
    }
    Err(ClientError::ConnectFailed { addr: config.addr.clone(), attempts: config.attempts })
}

async fn send_line(writer: &mut OwnedWriteHalf, msg: &ClientMessage) -> std::io::Result<()> {
    let mut line = msg.to_json().map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}

async fn run_loop(
    stream: TcpStream,
    config: &ClientConfig,
    mut input_rx: mpsc::UnboundedReceiver<ClientMessage>,
    updates: Arc<Mutex<VecDeque<ServerMessage>>>,
    running: Arc<AtomicBool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut ticker = tokio::time::interval(config.poll_interval);
    let mut ticks = 0u32;
    let mut awaiting_ack = false;

    while running.load(Ordering::Acquire) {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match ServerMessage::from_json(&line) {
                        Ok(ServerMessage::Ack) => awaiting_ack = false,
                        Ok(msg) => {
                            let mut queue = match updates.lock() {
                                Ok(queue) => queue,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            queue.push_back(msg);
                        }
                        Err(e) => debug!(error = %e, "undecodable line from server"),
                    },
                    Ok(None) => {
                        info!("server closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "read failed");
                        break;
                    }
                }
            }
            Some(msg) = input_rx.recv() => {
                if let Err(e) = send_line(&mut writer, &msg).await {
                    warn!(error = %e, "write failed");
                    break;
                }
            }
            _ = ticker.tick() => {
                ticks += 1;
                if ticks < config.heartbeat_ticks {
                    continue;
                }
                ticks = 0;
                if awaiting_ack {
                    warn!("heartbeat not acknowledged, closing");
                    break;
                }
                if let Err(e) = send_line(&mut writer, &ClientMessage::Heartbeat).await {
                    warn!(error = %e, "heartbeat write failed");
                    break;
                }
                awaiting_ack = true;
            }
        }
    }

    running.store(false, Ordering::Release);
    let _ = writer.shutdown().await;
}
