//! tcpconn - TCP connection factories for request/response messaging
//!
//! tcpconn opens and accepts TCP connections on behalf of higher-level
//! messaging adapters. Four factories share one API: blocking client and
//! server factories that dedicate a thread to each connection, and selector
//! client and server factories that multiplex every connection onto one mio
//! poll loop and dispatch reads to a worker pool. Connections can be pooled
//! (long-lived, shared) or single-use (one request/response exchange), time
//! out when idle, and be decorated by an interceptor chain.

// Internal-only modules
pub(crate) mod codec;
pub(crate) mod config;
pub(crate) mod connection;
pub(crate) mod error;
pub(crate) mod factory;
pub(crate) mod lifecycle;
pub(crate) mod message;
pub(crate) mod pool;
pub(crate) mod socket;

// These are the intended public API
pub use crate::codec::{Codec, CrLfCodec, LengthHeaderCodec};
pub use crate::config::ConnectionConfig;
pub use crate::connection::{
    connection_id, BlockingConnection, Connection, InterceptedConnection, Interceptor,
    InterceptorChain, InterceptorFactory, Listener, LoggingInterceptor, NioConnection, Sender,
    TrafficCounters, TrafficInterceptor,
};
pub use crate::error::{Error, ListenerError};
pub use crate::factory::{
    BlockingClientFactory, BlockingServerFactory, ClientConnectionFactory, ConnectionFactory,
    NioClientFactory, NioServerFactory, ServerConnectionFactory,
};
pub use crate::lifecycle::LifecycleState;
pub use crate::message::{Message, MessageHeaders};
pub use crate::pool::WorkerPool;
pub use crate::socket::SocketOptions;

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::codec::{Codec, CrLfCodec, LengthHeaderCodec};
    pub use crate::config::ConnectionConfig;
    pub use crate::connection::{Connection, Interceptor, InterceptorFactory, Listener, Sender};
    pub use crate::error::{Error, ListenerError};
    pub use crate::factory::{
        BlockingClientFactory, BlockingServerFactory, ClientConnectionFactory, ConnectionFactory,
        NioClientFactory, NioServerFactory, ServerConnectionFactory,
    };
    pub use crate::message::Message;
}
