//! Socket tuning.
//!
//! Options are applied through [`SockRef`] so the same code serves std
//! sockets (blocking factories) and mio sockets (selector factories).

use crate::config::ConnectionConfig;
use crate::error::Error;
use socket2::{Domain, SockRef, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::time::Duration;
use tracing::trace;

/// Options read back from a live socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    pub no_delay: bool,
    pub keep_alive: bool,
    pub linger: Option<Duration>,
    pub send_buffer_size: usize,
    pub receive_buffer_size: usize,
    pub read_timeout: Option<Duration>,
}

impl SocketOptions {
    pub(crate) fn read(socket: SockRef<'_>) -> Result<Self, Error> {
        Ok(Self {
            no_delay: socket.nodelay()?,
            keep_alive: socket.keepalive()?,
            linger: socket.linger()?,
            send_buffer_size: socket.send_buffer_size()?,
            receive_buffer_size: socket.recv_buffer_size()?,
            read_timeout: socket.read_timeout()?,
        })
    }
}

fn option_error(option: &'static str) -> impl FnOnce(io::Error) -> Error {
    move |source| Error::SocketOption { option, source }
}

/// Applies the configured options to a freshly opened or accepted socket.
///
/// `blocking` sockets get `so_timeout` as their read timeout; selector
/// sockets use it as the idle timeout instead. The first failure aborts.
pub(crate) fn apply_socket_attributes(
    socket: SockRef<'_>,
    config: &ConnectionConfig,
    blocking: bool,
) -> Result<(), Error> {
    if blocking {
        if let Some(timeout) = config.so_timeout.filter(|t| !t.is_zero()) {
            socket
                .set_read_timeout(Some(timeout))
                .map_err(option_error("SO_TIMEOUT"))?;
        }
    }
    if let Some(size) = config.so_send_buffer_size.filter(|&s| s > 0) {
        socket
            .set_send_buffer_size(size)
            .map_err(option_error("SO_SNDBUF"))?;
    }
    if let Some(size) = config.so_receive_buffer_size.filter(|&s| s > 0) {
        socket
            .set_recv_buffer_size(size)
            .map_err(option_error("SO_RCVBUF"))?;
    }
    socket
        .set_nodelay(config.so_tcp_no_delay)
        .map_err(option_error("TCP_NODELAY"))?;
    if let Some(linger) = config.so_linger {
        socket
            .set_linger(Some(linger))
            .map_err(option_error("SO_LINGER"))?;
    }
    if let Some(traffic_class) = config.so_traffic_class {
        socket
            .set_tos(traffic_class)
            .map_err(option_error("IP_TOS"))?;
    }
    socket
        .set_keepalive(config.so_keep_alive)
        .map_err(option_error("SO_KEEPALIVE"))?;
    trace!(
        so_timeout = ?config.so_timeout,
        no_delay = config.so_tcp_no_delay,
        keep_alive = config.so_keep_alive,
        "Applied socket attributes"
    );
    Ok(())
}

/// Resolves the client endpoint `host:port`.
pub(crate) fn remote_address(config: &ConnectionConfig) -> Result<SocketAddr, Error> {
    (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or(Error::InvalidAddress)
}

/// Binds a listening socket on the configured interface and port, with the
/// pool size as backlog.
pub(crate) fn bind_listener(config: &ConnectionConfig) -> Result<TcpListener, Error> {
    let host = config.local_address.as_deref().unwrap_or("0.0.0.0");
    let addr = (host, config.port)
        .to_socket_addrs()?
        .next()
        .ok_or(Error::InvalidAddress)?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    let backlog = i32::try_from(config.pool_size.max(1)).unwrap_or(i32::MAX);
    socket.listen(backlog)?;
    Ok(socket.into())
}
