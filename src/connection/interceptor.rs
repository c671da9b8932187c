//! Decorators around connections.
//!
//! An [`InterceptorChain`] folds its factories over a base connection: each
//! step wraps the current connection in an [`InterceptedConnection`], which
//! registers itself as the current connection's listener so inbound messages
//! traverse every decorator on the way to the factory's listener. Outbound
//! calls travel the other way, from the outermost decorator to the socket.

use super::{Connection, Listener, Registration, Sender};
use crate::error::{Error, ListenerError};
use crate::message::Message;
use crate::socket::SocketOptions;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Cross-cutting behavior around one connection.
///
/// Every hook defaults to passing the call through unchanged.
pub trait Interceptor: Send + Sync + Debug {
    /// Called for each inbound message; `next` is the next listener inward.
    fn on_message(
        &self,
        connection: &dyn Connection,
        message: Message,
        next: &dyn Listener,
    ) -> Result<(), ListenerError> {
        let _ = connection;
        next.on_message(message)
    }

    /// Called for each outbound message; `next` is the wrapped connection.
    fn send(&self, message: &Message, next: &dyn Connection) -> Result<(), Error> {
        next.send(message)
    }

    /// Called when the caller closes the connection.
    fn close(&self, next: &dyn Connection) {
        next.close()
    }
}

/// Creates one interceptor per connection.
pub trait InterceptorFactory: Send + Sync {
    fn create_interceptor(&self) -> Box<dyn Interceptor>;
}

// ============================================================================
// InterceptedConnection
// ============================================================================

/// A connection decorated by one interceptor.
#[derive(Debug)]
pub struct InterceptedConnection {
    inner: Arc<dyn Connection>,
    interceptor: Box<dyn Interceptor>,
    listener: Registration<dyn Listener>,
    sender: Registration<dyn Sender>,
}

impl InterceptedConnection {
    pub fn new(inner: Arc<dyn Connection>, interceptor: Box<dyn Interceptor>) -> Self {
        Self {
            inner,
            interceptor,
            listener: Registration::new(),
            sender: Registration::new(),
        }
    }

    /// The connection this decorator wraps.
    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.inner
    }
}

impl Connection for InterceptedConnection {
    fn connection_id(&self) -> &str {
        self.inner.connection_id()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn is_server(&self) -> bool {
        self.inner.is_server()
    }

    fn is_single_use(&self) -> bool {
        self.inner.is_single_use()
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr()
    }

    fn send(&self, message: &Message) -> Result<(), Error> {
        self.interceptor.send(message, self.inner.as_ref())
    }

    fn close(&self) {
        self.interceptor.close(self.inner.as_ref())
    }

    fn register_listener(&self, listener: Arc<dyn Listener>) -> Result<(), Error> {
        if self.listener.set(listener) {
            Ok(())
        } else {
            Err(Error::ListenerAlreadyRegistered)
        }
    }

    fn register_sender(&self, sender: Arc<dyn Sender>) -> Result<(), Error> {
        if self.sender.set(sender) {
            Ok(())
        } else {
            Err(Error::SenderAlreadyRegistered)
        }
    }

    fn listener(&self) -> Option<Arc<dyn Listener>> {
        self.listener.get()
    }

    fn sender(&self) -> Option<Arc<dyn Sender>> {
        self.sender.get()
    }

    fn socket_options(&self) -> Result<SocketOptions, Error> {
        self.inner.socket_options()
    }
}

impl Listener for InterceptedConnection {
    fn on_message(&self, message: Message) -> Result<(), ListenerError> {
        match self.listener.get() {
            Some(next) => self
                .interceptor
                .on_message(self.inner.as_ref(), message, next.as_ref()),
            None => Err(ListenerError::NoListener),
        }
    }

    fn on_connection_closed(&self, connection_id: &str) {
        // Release the outward references so the chain can be dropped
        if let Some(sender) = self.sender.take() {
            sender.remove_dead_connection(connection_id);
        }
        if let Some(next) = self.listener.take() {
            next.on_connection_closed(connection_id);
        }
    }
}

impl Sender for InterceptedConnection {
    fn add_new_connection(&self, connection: Arc<dyn Connection>) {
        if let Some(sender) = self.sender.get() {
            sender.add_new_connection(connection);
        }
    }

    fn remove_dead_connection(&self, connection_id: &str) {
        if let Some(sender) = self.sender.take() {
            sender.remove_dead_connection(connection_id);
        }
    }
}

// ============================================================================
// InterceptorChain
// ============================================================================

/// An ordered list of interceptor factories, applied innermost first.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    factories: Vec<Arc<dyn InterceptorFactory>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, factory: Arc<dyn InterceptorFactory>) {
        self.factories.push(factory);
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Wraps `base` in one decorator per factory and returns the outermost.
    ///
    /// Each decorator becomes the listener of the connection it wraps. With
    /// `chain_senders` it also becomes that connection's sender, so dead
    /// connection notices reach the factory's sender through the chain.
    pub fn wrap(
        &self,
        base: Arc<dyn Connection>,
        chain_senders: bool,
    ) -> Result<Arc<dyn Connection>, Error> {
        self.factories.iter().try_fold(base, |current, factory| {
            let wrapper = Arc::new(InterceptedConnection::new(
                current.clone(),
                factory.create_interceptor(),
            ));
            current.register_listener(wrapper.clone())?;
            if chain_senders {
                current.register_sender(wrapper.clone())?;
            }
            Ok(wrapper as Arc<dyn Connection>)
        })
    }
}

impl Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.factories.len())
            .finish()
    }
}

// ============================================================================
// Stock Interceptors
// ============================================================================

/// Logs every message and close passing through a connection.
#[derive(Debug, Default, Clone)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn on_message(
        &self,
        connection: &dyn Connection,
        message: Message,
        next: &dyn Listener,
    ) -> Result<(), ListenerError> {
        info!(id = connection.connection_id(), len = message.payload.len(), "Inbound message");
        next.on_message(message)
    }

    fn send(&self, message: &Message, next: &dyn Connection) -> Result<(), Error> {
        info!(id = next.connection_id(), len = message.payload.len(), "Outbound message");
        next.send(message)
    }

    fn close(&self, next: &dyn Connection) {
        info!(id = next.connection_id(), "Closing connection");
        next.close()
    }
}

impl InterceptorFactory for LoggingInterceptor {
    fn create_interceptor(&self) -> Box<dyn Interceptor> {
        Box::new(LoggingInterceptor)
    }
}

/// Message and byte counts, shared by every connection of a factory.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    pub messages_in: AtomicU64,
    pub messages_out: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

/// Counts traffic into a shared [`TrafficCounters`].
#[derive(Debug, Clone)]
pub struct TrafficInterceptor {
    counters: Arc<TrafficCounters>,
}

impl TrafficInterceptor {
    pub fn new(counters: Arc<TrafficCounters>) -> Self {
        Self { counters }
    }
}

impl Interceptor for TrafficInterceptor {
    fn on_message(
        &self,
        _connection: &dyn Connection,
        message: Message,
        next: &dyn Listener,
    ) -> Result<(), ListenerError> {
        self.counters.messages_in.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_in
            .fetch_add(message.payload.len() as u64, Ordering::Relaxed);
        next.on_message(message)
    }

    fn send(&self, message: &Message, next: &dyn Connection) -> Result<(), Error> {
        next.send(message)?;
        self.counters.messages_out.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_out
            .fetch_add(message.payload.len() as u64, Ordering::Relaxed);
        debug!(id = next.connection_id(), "Counted outbound message");
        Ok(())
    }
}

impl InterceptorFactory for TrafficInterceptor {
    fn create_interceptor(&self) -> Box<dyn Interceptor> {
        Box::new(self.clone())
    }
}
