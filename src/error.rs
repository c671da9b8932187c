use thiserror::Error;

/// The error type for tcpconn operations.
///
/// Setup failures (bind, connect, socket options) and construction-time
/// programming errors (duplicate registrations, reconfiguring a running
/// factory) are returned synchronously. Steady-state I/O failures on an open
/// connection are logged and close that connection instead.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured host/port could not be resolved to a socket address.
    #[error("Invalid socket address")]
    InvalidAddress,

    /// Applying a socket option failed; the connection was not created.
    #[error("Failed to apply socket option {option}: {source}")]
    SocketOption {
        /// The option that was being applied.
        option: &'static str,
        source: std::io::Error,
    },

    /// Attempted to use a connection that has already been closed.
    #[error("Connection {id} is closed")]
    ConnectionClosed {
        /// The connection ID.
        id: String,
    },

    /// The peer closed the stream in the middle of a frame.
    #[error("Connection {id} closed mid-frame")]
    UnexpectedEndOfStream {
        /// The connection ID.
        id: String,
    },

    // ============================================================================
    // Framing Errors
    // ============================================================================

    /// A frame exceeded the configured maximum message size.
    #[error("Message of {size} bytes exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// The byte stream doesn't match the codec's framing.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    // ============================================================================
    // Lifecycle and Registration Errors
    // ============================================================================

    /// A second listener was registered on a factory or connection.
    ///
    /// A factory serves exactly one inbound adapter.
    #[error("A listener is already registered")]
    ListenerAlreadyRegistered,

    /// A second sender was registered on a factory or connection.
    #[error("A sender is already registered")]
    SenderAlreadyRegistered,

    /// The factory was reconfigured after `start()`.
    #[error("Factory is running and can no longer be reconfigured")]
    AlreadyRunning,

    /// A connection was requested from a factory that isn't running.
    #[error("Factory is not running")]
    NotRunning,

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Error returned by a [`Listener`](crate::Listener) for an inbound message.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// No consumer is currently interested in this message.
    ///
    /// Pooled connections log a warning and keep reading; single-use
    /// connections treat it as the end of the exchange and close.
    #[error("No listener interested in message")]
    NoListener,

    /// The listener failed to process the message.
    #[error("Listener failed: {0}")]
    Failed(String),
}
