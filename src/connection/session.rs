// State and read-dispatch rules shared by blocking and selector connections.

use super::{connection_id, Listener, Registration, Sender};
use crate::codec::Codec;
use crate::config::ConnectionConfig;
use crate::error::{Error, ListenerError};
use crate::message::Message;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

// What the read side should do after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Continue,
    Close,
}

pub(crate) struct Session {
    id: String,
    server: bool,
    single_use: bool,
    close_unanswered_on_timeout: bool,
    max_message_size: usize,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    codec: Arc<dyn Codec>,
    open: AtomicBool,
    listener: Registration<dyn Listener>,
    sender: Registration<dyn Sender>,
}

impl Session {
    pub fn new(
        config: &ConnectionConfig,
        codec: Arc<dyn Codec>,
        server: bool,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            id: connection_id(local_addr, peer_addr),
            server,
            single_use: config.single_use,
            close_unanswered_on_timeout: config.close_unanswered_on_timeout,
            max_message_size: config.max_message_size,
            local_addr,
            peer_addr,
            codec,
            open: AtomicBool::new(true),
            listener: Registration::new(),
            sender: Registration::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    pub fn is_single_use(&self) -> bool {
        self.single_use
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn register_listener(&self, listener: Arc<dyn Listener>) -> Result<(), Error> {
        if self.listener.set(listener) {
            Ok(())
        } else {
            Err(Error::ListenerAlreadyRegistered)
        }
    }

    pub fn register_sender(&self, sender: Arc<dyn Sender>) -> Result<(), Error> {
        if self.sender.set(sender) {
            Ok(())
        } else {
            Err(Error::SenderAlreadyRegistered)
        }
    }

    pub fn listener(&self) -> Option<Arc<dyn Listener>> {
        self.listener.get()
    }

    pub fn sender(&self) -> Option<Arc<dyn Sender>> {
        self.sender.get()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_set()
    }

    /// Marks the session closed and notifies the sender and listener.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        debug!(id = %self.id, "Closing connection");
        // Dropping both slots releases the decorator chain
        if let Some(sender) = self.sender.take() {
            sender.remove_dead_connection(&self.id);
        }
        if let Some(listener) = self.listener.take() {
            listener.on_connection_closed(&self.id);
        }
        true
    }

    /// A reply on a single-use server connection completes the exchange.
    pub fn closes_after_reply(&self) -> bool {
        self.single_use && self.server
    }

    /// Hands one decoded payload to the listener and applies the single-use
    /// rules.
    pub fn deliver(&self, payload: Vec<u8>) -> ReadOutcome {
        let message = Message::inbound(payload, &self.id, self.peer_addr, self.local_addr.port());
        trace!(id = %self.id, len = message.payload.len(), "Message received");

        match self.listener.get() {
            None => {
                warn!(id = %self.id, "Unexpected message - no listener registered with connection");
            }
            Some(listener) => match listener.on_message(message) {
                Ok(()) => {}
                Err(ListenerError::NoListener) if self.single_use => {
                    debug!(id = %self.id, "Closing single use connection after inbound message");
                    return ReadOutcome::Close;
                }
                Err(ListenerError::NoListener) => {
                    warn!(id = %self.id, "Unexpected message - no listener interested");
                }
                Err(err) => {
                    error!(id = %self.id, ?err, "Listener failed to handle message");
                }
            },
        }

        // Client side of a single-use exchange, or a server side with nobody
        // to reply: the exchange is over.
        if self.single_use && (!self.server || !self.sender.is_set()) {
            debug!(id = %self.id, "Closing single use connection after inbound message");
            return ReadOutcome::Close;
        }
        ReadOutcome::Continue
    }

    /// Decides whether an idle/read timeout closes this connection.
    pub fn on_idle_timeout(&self) -> bool {
        if !self.single_use {
            warn!(id = %self.id, "Timing out pooled connection");
            return true;
        }
        if self.server && self.sender.is_set() && !self.close_unanswered_on_timeout {
            debug!(id = %self.id, "Single use connection still awaiting reply");
            return false;
        }
        debug!(id = %self.id, "Closing single use connection after timeout");
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("single_use", &self.single_use)
            .field("open", &self.is_open())
            .finish()
    }
}
