//! Connection factories.
//!
//! Four implementations share one capability surface: blocking client and
//! server factories run one thread per connection, while the selector
//! client and server factories multiplex every connection onto a single mio
//! poll loop and dispatch reads to a worker pool.

mod blocking_client;
mod blocking_server;
mod shared;
mod nio_client;
mod nio_server;
mod reactor;

pub use blocking_client::BlockingClientFactory;
pub use blocking_server::BlockingServerFactory;
pub use nio_client::NioClientFactory;
pub use nio_server::NioServerFactory;

use crate::codec::Codec;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, InterceptorFactory, Listener, Sender};
use crate::error::Error;
use crate::lifecycle::LifecycleState;
use crate::pool::WorkerPool;
use std::sync::Arc;

/// Lifecycle, registration and configuration shared by every factory.
///
/// Configuration calls fail with [`Error::AlreadyRunning`] once the factory
/// has started; registrations are allowed exactly once each.
pub trait ConnectionFactory: Send + Sync {
    /// Starts the factory's I/O loop. Calling it on a running factory is a
    /// no-op. Bind failures are returned to the caller.
    fn start(&self) -> Result<(), Error>;

    /// Stops the I/O loop and releases the listening socket. Open
    /// connections are left to drain.
    fn stop(&self);

    fn is_running(&self) -> bool;

    fn state(&self) -> LifecycleState;

    fn register_listener(&self, listener: Arc<dyn Listener>) -> Result<(), Error>;

    fn register_sender(&self, sender: Arc<dyn Sender>) -> Result<(), Error>;

    /// Mutates the configuration before start.
    fn configure(&self, f: &mut dyn FnMut(&mut ConnectionConfig)) -> Result<(), Error>;

    fn set_codec(&self, codec: Arc<dyn Codec>) -> Result<(), Error>;

    /// Appends an interceptor factory; decorators apply in insertion order.
    fn add_interceptor(&self, factory: Arc<dyn InterceptorFactory>) -> Result<(), Error>;

    /// Supplies the worker pool instead of creating one on start.
    fn set_worker_pool(&self, pool: WorkerPool) -> Result<(), Error>;

    /// Snapshot of the connection ids currently tracked by this factory.
    fn connection_ids(&self) -> Vec<String>;
}

/// A factory that opens outbound connections.
pub trait ClientConnectionFactory: ConnectionFactory {
    /// Returns the shared connection while it is open, or a fresh one for
    /// single-use factories and after the shared one closed.
    fn get_connection(&self) -> Result<Arc<dyn Connection>, Error>;
}

/// A factory that accepts inbound connections.
pub trait ServerConnectionFactory: ConnectionFactory {
    /// The bound port, once listening.
    fn local_port(&self) -> Option<u16>;
}

// Delegates the configuration half of ConnectionFactory to a FactoryCore.
macro_rules! delegate_to_core {
    ($core:ident) => {
        fn is_running(&self) -> bool {
            self.$core().lifecycle.is_running()
        }

        fn state(&self) -> $crate::lifecycle::LifecycleState {
            self.$core().lifecycle.state()
        }

        fn register_listener(
            &self,
            listener: std::sync::Arc<dyn $crate::connection::Listener>,
        ) -> Result<(), $crate::error::Error> {
            self.$core().register_listener(listener)
        }

        fn register_sender(
            &self,
            sender: std::sync::Arc<dyn $crate::connection::Sender>,
        ) -> Result<(), $crate::error::Error> {
            self.$core().register_sender(sender)
        }

        fn configure(
            &self,
            f: &mut dyn FnMut(&mut $crate::config::ConnectionConfig),
        ) -> Result<(), $crate::error::Error> {
            self.$core().configure(f)
        }

        fn set_codec(
            &self,
            codec: std::sync::Arc<dyn $crate::codec::Codec>,
        ) -> Result<(), $crate::error::Error> {
            self.$core().set_codec(codec)
        }

        fn add_interceptor(
            &self,
            factory: std::sync::Arc<dyn $crate::connection::InterceptorFactory>,
        ) -> Result<(), $crate::error::Error> {
            self.$core().add_interceptor(factory)
        }

        fn set_worker_pool(&self, pool: $crate::pool::WorkerPool) -> Result<(), $crate::error::Error> {
            self.$core().set_worker_pool(pool)
        }
    };
}

pub(crate) use delegate_to_core;
