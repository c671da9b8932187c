//! Selector loop shared by the selector client and server factories.
//!
//! One thread per factory polls for readiness and owns every registration
//! change. Each iteration drains the handoff queue, sweeps idle connections,
//! polls, and dispatches events: accepts are handled inline, reads go to the
//! worker pool with read interest withdrawn until the read completes, and
//! pending writes are flushed inline.
//!
//! Stopping the factory closes the listening socket but leaves established
//! channels with the loop that registered them. The loop keeps reading and
//! sweeping those until they close or time out, then exits.

use super::shared::{ConnectionRegistry, FactoryCore};
use crate::connection::{Connection, LoopHandle, LoopRequest, NioConnection};
use crate::error::Error;
use crate::pool::WorkerPool;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const WAKE_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);
pub(crate) const CONNECTION_TOKEN_START: usize = 1000;
const EVENT_CAPACITY: usize = 1024;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) type NioRegistry = ConnectionRegistry<Token, NioConnection>;

/// Builds server-side connections for accepted sockets.
pub(crate) trait Acceptor: Send + Sync {
    fn create_connection(
        &self,
        stream: TcpStream,
        token: Token,
        handle: &LoopHandle,
    ) -> Result<Arc<NioConnection>, Error>;
}

struct Acceptance {
    listener: TcpListener,
    acceptor: Arc<dyn Acceptor>,
    // Owned by the factory so tokens stay unique across restarts.
    next_token: Arc<AtomicUsize>,
}

pub(crate) struct Reactor {
    core: Arc<FactoryCore>,
    poll: Poll,
    requests: mpsc::Receiver<LoopRequest>,
    handle: LoopHandle,
    registry: NioRegistry,
    // Tokens this loop registered. The registry can outlive the loop and be
    // shared with a later one after a restart.
    tracked: HashSet<Token>,
    // Interest currently registered with the poll; absent means deregistered.
    interests: HashMap<Token, Interest>,
    reading: HashSet<Token>,
    writing: HashSet<Token>,
    pool: WorkerPool,
    idle_timeout: Option<Duration>,
    acceptance: Option<Acceptance>,
    shutting_down: bool,
}

// ============================================================================
// Constructors
// ============================================================================

impl Reactor {
    pub fn new(
        core: Arc<FactoryCore>,
        registry: NioRegistry,
        pool: WorkerPool,
        idle_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (sender, requests) = mpsc::channel();
        Ok(Self {
            core,
            poll,
            requests,
            handle: LoopHandle::new(sender, waker),
            registry,
            tracked: HashSet::new(),
            interests: HashMap::new(),
            reading: HashSet::new(),
            writing: HashSet::new(),
            pool,
            idle_timeout,
            acceptance: None,
            shutting_down: false,
        })
    }

    /// Registers a bound listener; accepted sockets go through `acceptor`
    /// and draw their tokens from `next_token`.
    pub fn with_acceptor(
        mut self,
        mut listener: TcpListener,
        acceptor: Arc<dyn Acceptor>,
        next_token: Arc<AtomicUsize>,
    ) -> Result<Self, Error> {
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        self.acceptance = Some(Acceptance {
            listener,
            acceptor,
            next_token,
        });
        Ok(self)
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }
}

// ============================================================================
// Selector Loop
// ============================================================================

impl Reactor {
    /// Runs until a shutdown request arrives and every channel this loop
    /// registered is gone.
    pub fn run(mut self) {
        info!(name = %self.core.name(), "Selector running");
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        // Sweeping a few times per timeout keeps eviction close to it
        let poll_interval = self
            .idle_timeout
            .map(|timeout| (timeout / 4).max(MIN_POLL_INTERVAL));

        loop {
            self.process_requests();
            if self.shutting_down && self.tracked.is_empty() {
                break;
            }

            if let Some(timeout) = self.idle_timeout {
                self.sweep(timeout);
            }

            if let Err(err) = self.poll.poll(&mut events, poll_interval) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(name = %self.core.name(), ?err, "Selector failed");
                // A draining loop no longer speaks for the factory
                if !self.shutting_down {
                    self.core.lifecycle.stop();
                }
                break;
            }
            trace!(count = events.iter().count(), "Selection count");

            for event in events.iter() {
                match event.token() {
                    WAKE_TOKEN => {}
                    LISTENER_TOKEN => self.accept_connections(),
                    token => {
                        if event.is_writable() {
                            self.flush(token);
                        }
                        if event.is_readable() || event.is_read_closed() || event.is_error() {
                            self.dispatch_read(token);
                        }
                    }
                }
            }
        }

        info!(name = %self.core.name(), "Selector exiting");
    }

    fn process_requests(&mut self) {
        let requests: Vec<LoopRequest> = self.requests.try_iter().collect();
        for request in requests {
            match request {
                LoopRequest::Register(connection) => self.track(connection),
                LoopRequest::Rearm(token) => {
                    self.reading.remove(&token);
                    self.update_interest(token);
                }
                LoopRequest::Writable(token) => {
                    self.writing.insert(token);
                    self.update_interest(token);
                }
                LoopRequest::Closed(token) => self.remove(token),
                LoopRequest::Shutdown => self.shut_down(),
            }
        }
    }

    fn shut_down(&mut self) {
        self.shutting_down = true;
        if let Some(mut acceptance) = self.acceptance.take() {
            if let Err(err) = self.poll.registry().deregister(&mut acceptance.listener) {
                debug!(?err, "Failed to deregister server socket");
            }
        }
        if !self.tracked.is_empty() {
            info!(
                name = %self.core.name(),
                count = self.tracked.len(),
                "Stopped accepting; draining open channels"
            );
        }
    }

    // Drops closed channels and times out connections idle for longer than
    // `timeout`. Connections with a read in flight are busy, not idle.
    fn sweep(&mut self, timeout: Duration) {
        let now = Instant::now();
        let tokens: Vec<Token> = self.tracked.iter().copied().collect();
        for token in tokens {
            let Some(connection) = self.registry.get(&token) else {
                self.tracked.remove(&token);
                continue;
            };
            if !connection.is_open() {
                debug!(id = connection.connection_id(), "Removing closed channel");
                self.remove(token);
            } else if !self.reading.contains(&token)
                && now.saturating_duration_since(connection.last_read()) > timeout
                && connection.timeout()
            {
                self.remove(token);
            }
        }
    }
}

// ============================================================================
// Event Handling
// ============================================================================

impl Reactor {
    fn accept_connections(&mut self) {
        let Some(acceptance) = self.acceptance.as_mut() else {
            return;
        };

        let mut accepted = Vec::new();
        loop {
            match acceptance.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let token = Token(acceptance.next_token.fetch_add(1, Ordering::Relaxed));
                    debug!(%peer_addr, "New accept");
                    match acceptance
                        .acceptor
                        .create_connection(stream, token, &self.handle)
                    {
                        Ok(connection) => accepted.push(connection),
                        Err(err) => {
                            error!(%peer_addr, ?err, "Failed to establish new incoming connection")
                        }
                    }
                }
                Err(err) => match err.kind() {
                    ErrorKind::WouldBlock => break,
                    ErrorKind::Interrupted => continue,
                    ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
                        warn!(?err, "Transient accept error");
                        continue;
                    }
                    _ => {
                        error!(?err, "Error accepting connection");
                        break;
                    }
                },
            }
        }

        for connection in accepted {
            self.track(connection);
        }
    }

    fn track(&mut self, connection: Arc<NioConnection>) {
        let token = connection.token();
        self.tracked.insert(token);
        self.registry.insert(token, connection);
        self.update_interest(token);
    }

    fn dispatch_read(&mut self, token: Token) {
        let Some(connection) = self.registry.get(&token) else {
            trace!(?token, "Event for unknown channel");
            return;
        };
        // Read interest is withdrawn while a read is in flight, but events
        // already collected in this batch can still name the token
        if !self.reading.insert(token) {
            return;
        }
        self.update_interest(token);
        connection.touch();

        let handle = self.handle.clone();
        self.pool.execute(move || {
            if let Err(err) = connection.read_packet() {
                if connection.is_open() {
                    error!(id = connection.connection_id(), ?err, "Exception on read");
                    connection.close();
                } else {
                    debug!(id = connection.connection_id(), "Connection closed");
                }
            }
            if connection.is_open() {
                handle.request(LoopRequest::Rearm(token));
            }
        });
    }

    fn flush(&mut self, token: Token) {
        let Some(connection) = self.registry.get(&token) else {
            return;
        };
        match connection.flush() {
            Ok(true) => {
                self.writing.remove(&token);
                self.update_interest(token);
            }
            Ok(false) => {}
            Err(err) => {
                error!(id = connection.connection_id(), ?err, "Exception on write");
                connection.close();
            }
        }
    }

    // Brings the poll registration in line with what the connection needs.
    fn update_interest(&mut self, token: Token) {
        let Some(connection) = self.registry.get(&token) else {
            return;
        };
        if !connection.is_open() {
            self.remove(token);
            return;
        }

        let read = !self.reading.contains(&token);
        let write = self.writing.contains(&token);
        let desired = match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };
        let current = self.interests.get(&token).copied();
        if desired == current {
            return;
        }

        let registry = self.poll.registry();
        let result = connection.with_stream(|stream| match (current, desired) {
            (None, Some(interest)) => registry.register(stream, token, interest),
            (Some(_), Some(interest)) => registry.reregister(stream, token, interest),
            (Some(_), None) => registry.deregister(stream),
            (None, None) => Ok(()),
        });

        match result {
            Ok(()) => match desired {
                Some(interest) => {
                    self.interests.insert(token, interest);
                }
                None => {
                    self.interests.remove(&token);
                }
            },
            Err(err) => {
                error!(id = connection.connection_id(), ?err, "Failed to update selector registration");
                connection.close();
                self.remove(token);
            }
        }
    }

    fn remove(&mut self, token: Token) {
        if !self.tracked.remove(&token) {
            return;
        }
        let Some(connection) = self.registry.remove(&token) else {
            return;
        };
        if self.interests.remove(&token).is_some() {
            let registry = self.poll.registry();
            if let Err(err) = connection.with_stream(|stream| registry.deregister(stream)) {
                debug!(id = connection.connection_id(), ?err, "Failed to deregister channel");
            }
        }
        self.reading.remove(&token);
        self.writing.remove(&token);
        trace!(id = connection.connection_id(), "Channel removed");
    }
}
