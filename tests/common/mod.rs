//! Shared helpers for the integration tests.
//!
//! # Running with tracing
//!
//! Use TEST_LOG environment variable to control tracing verbosity (like -v, -vv, -vvv):
//!
//! ```bash
//! # Info level (equivalent to -v)
//! TEST_LOG=1 cargo test nio_server -- --nocapture
//!
//! # Debug level (equivalent to -vv)
//! TEST_LOG=2 cargo test nio_server -- --nocapture
//!
//! # Trace level (equivalent to -vvv)
//! TEST_LOG=3 cargo test nio_server -- --nocapture
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};
use tcpconn::prelude::*;

static INIT: Once = Once::new();

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing based on TEST_LOG environment variable
///
/// Verbosity levels (like -v, -vv, -vvv):
/// - TEST_LOG=1: Info level
/// - TEST_LOG=2: Debug level
/// - TEST_LOG=3: Trace level
pub fn init_tracing() {
    INIT.call_once(|| {
        if let Ok(level_str) = std::env::var("TEST_LOG") {
            let verbosity = level_str.parse::<u8>().unwrap_or(0);

            if verbosity > 0 {
                let level = match verbosity {
                    1 => "info",
                    2 => "debug",
                    _ => "trace", // 3 or more
                };

                let filter = format!("tcpconn={}", level);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_test_writer()
                    .try_init();
            }
        }
    });
}

// ============================================================================
// Listeners and Senders
// ============================================================================

/// Forwards every inbound message and close notice to channels.
pub struct CollectingListener {
    messages: Mutex<mpsc::Sender<Message>>,
    closed: Mutex<mpsc::Sender<String>>,
    reject: bool,
}

pub struct Collected {
    pub messages: mpsc::Receiver<Message>,
    pub closed: mpsc::Receiver<String>,
}

impl CollectingListener {
    pub fn new() -> (Arc<Self>, Collected) {
        Self::build(false)
    }

    /// Collects messages but reports nobody interested in them.
    pub fn rejecting() -> (Arc<Self>, Collected) {
        Self::build(true)
    }

    fn build(reject: bool) -> (Arc<Self>, Collected) {
        let (message_tx, messages) = mpsc::channel();
        let (closed_tx, closed) = mpsc::channel();
        let listener = Arc::new(Self {
            messages: Mutex::new(message_tx),
            closed: Mutex::new(closed_tx),
            reject,
        });
        (listener, Collected { messages, closed })
    }
}

impl Listener for CollectingListener {
    fn on_message(&self, message: Message) -> Result<(), ListenerError> {
        let _ = self.messages.lock().unwrap().send(message);
        if self.reject {
            Err(ListenerError::NoListener)
        } else {
            Ok(())
        }
    }

    fn on_connection_closed(&self, connection_id: &str) {
        let _ = self.closed.lock().unwrap().send(connection_id.to_string());
    }
}

/// Keeps connections by id, the way a reply gateway would.
#[derive(Default)]
pub struct ConnectionTracker {
    connections: Mutex<HashMap<String, Arc<dyn Connection>>>,
    added: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl ConnectionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.connections.lock().unwrap().get(id).cloned()
    }

    pub fn any(&self) -> Option<Arc<dyn Connection>> {
        self.connections.lock().unwrap().values().next().cloned()
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl tcpconn::Sender for ConnectionTracker {
    fn add_new_connection(&self, connection: Arc<dyn Connection>) {
        let id = connection.connection_id().to_string();
        self.added.lock().unwrap().push(id.clone());
        self.connections.lock().unwrap().insert(id, connection);
    }

    fn remove_dead_connection(&self, connection_id: &str) {
        self.removed
            .lock()
            .unwrap()
            .push(connection_id.to_string());
        self.connections.lock().unwrap().remove(connection_id);
    }
}

/// Replies to every message with `echo:<payload>` on the originating
/// connection.
pub struct EchoListener {
    tracker: Arc<ConnectionTracker>,
}

impl EchoListener {
    pub fn new(tracker: Arc<ConnectionTracker>) -> Arc<Self> {
        Arc::new(Self { tracker })
    }
}

impl Listener for EchoListener {
    fn on_message(&self, message: Message) -> Result<(), ListenerError> {
        let id = message
            .connection_id()
            .ok_or_else(|| ListenerError::Failed("missing connection id".to_string()))?;
        let connection = self
            .tracker
            .get(id)
            .ok_or_else(|| ListenerError::Failed(format!("unknown connection {id}")))?;
        let mut reply = b"echo:".to_vec();
        reply.extend_from_slice(&message.payload);
        connection
            .send(&Message::new(reply))
            .map_err(|err| ListenerError::Failed(err.to_string()))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn server_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// A raw CRLF line client for poking at servers.
pub struct LineClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl LineClient {
    pub fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(server_addr(port)).expect("Failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("Failed to set read timeout");
        let reader = BufReader::new(stream.try_clone().expect("Failed to clone stream"));
        Self { stream, reader }
    }

    pub fn send_line(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .expect("Failed to write");
    }

    pub fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches("\r\n").to_string()),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.stream.local_addr().expect("No local address").port()
    }
}
