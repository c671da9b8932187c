//! Connections and the callbacks they notify.
//!
//! A [`Connection`] is one live socket. Inbound frames are decoded by the
//! factory's [`Codec`](crate::Codec) and handed to the registered
//! [`Listener`]; a registered [`Sender`] learns when server-side connections
//! come and go so it can route replies.

mod blocking;
mod interceptor;
mod nio;
mod session;

pub use blocking::BlockingConnection;
pub use interceptor::{
    InterceptedConnection, Interceptor, InterceptorChain, InterceptorFactory, LoggingInterceptor,
    TrafficCounters, TrafficInterceptor,
};
pub use nio::NioConnection;

pub(crate) use nio::{LoopHandle, LoopRequest};
pub(crate) use session::Session;

use crate::error::{Error, ListenerError};
use crate::message::Message;
use crate::socket::SocketOptions;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One socket's session.
///
/// Connections are shared as `Arc<dyn Connection>`; decorated connections
/// returned by a factory behave exactly like the base connection they wrap.
pub trait Connection: Send + Sync + Debug {
    /// Stable id derived from the peer address and local port.
    fn connection_id(&self) -> &str;

    fn is_open(&self) -> bool;

    /// True when this connection was accepted by a server factory.
    fn is_server(&self) -> bool;

    fn is_single_use(&self) -> bool;

    fn local_addr(&self) -> SocketAddr;

    fn peer_addr(&self) -> SocketAddr;

    /// Encodes and writes the message payload.
    fn send(&self, message: &Message) -> Result<(), Error>;

    /// Closes the connection. Closing twice is a no-op.
    fn close(&self);

    /// Registers the listener for inbound messages. Allowed once.
    fn register_listener(&self, listener: Arc<dyn Listener>) -> Result<(), Error>;

    /// Registers the sender for this connection. Allowed once.
    fn register_sender(&self, sender: Arc<dyn Sender>) -> Result<(), Error>;

    fn listener(&self) -> Option<Arc<dyn Listener>>;

    fn sender(&self) -> Option<Arc<dyn Sender>>;

    /// Reads back the options currently set on the underlying socket.
    fn socket_options(&self) -> Result<SocketOptions, Error>;
}

/// Receives inbound messages.
pub trait Listener: Send + Sync {
    /// Handles one inbound message.
    ///
    /// Returning [`ListenerError::NoListener`] tells the connection nobody
    /// wanted the message.
    fn on_message(&self, message: Message) -> Result<(), ListenerError>;

    /// Called once when the connection delivering to this listener closes.
    fn on_connection_closed(&self, _connection_id: &str) {}
}

/// Tracks connections so replies can be routed back to their origin.
pub trait Sender: Send + Sync {
    fn add_new_connection(&self, connection: Arc<dyn Connection>);

    fn remove_dead_connection(&self, connection_id: &str);
}

/// Derives the connection id for a socket.
pub fn connection_id(local_addr: SocketAddr, peer_addr: SocketAddr) -> String {
    format!(
        "{}:{}:{}",
        peer_addr.ip(),
        peer_addr.port(),
        local_addr.port()
    )
}

// ============================================================================
// Registration Slot
// ============================================================================

// A slot that accepts exactly one registration over its lifetime. The value
// can be taken out again (on close) but never replaced.
pub(crate) struct Registration<T: ?Sized> {
    slot: Mutex<Option<Arc<T>>>,
    registered: AtomicBool,
}

impl<T: ?Sized> Registration<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            registered: AtomicBool::new(false),
        }
    }

    /// Returns false if something was registered before.
    pub fn set(&self, value: Arc<T>) -> bool {
        if self.registered.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.slot.lock() = Some(value);
        true
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.lock().clone()
    }

    pub fn take(&self) -> Option<Arc<T>> {
        self.slot.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T: ?Sized> Debug for Registration<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("registered", &self.registered.load(Ordering::Acquire))
            .field("present", &self.is_set())
            .finish()
    }
}
