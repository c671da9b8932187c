use super::shared::{ConnectionRegistry, FactoryCore};
use super::{ConnectionFactory, ServerConnectionFactory};
use crate::config::ConnectionConfig;
use crate::connection::BlockingConnection;
use crate::error::Error;
use crate::socket::{apply_socket_attributes, bind_listener};
use parking_lot::Mutex;
use socket2::SockRef;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Accepts connections on a blocking listener, one reader thread per
/// connection.
///
/// Without a registered listener the factory starts but never binds, since
/// nothing would consume inbound messages.
pub struct BlockingServerFactory {
    shared: Arc<Shared>,
}

struct Shared {
    core: Arc<FactoryCore>,
    registry: ConnectionRegistry<String, BlockingConnection>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl BlockingServerFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        let name = format!("tcp-net-server-{}", config.port);
        Self {
            shared: Arc::new(Shared {
                core: Arc::new(FactoryCore::new(name, config)),
                registry: ConnectionRegistry::new(),
                local_addr: Mutex::new(None),
            }),
        }
    }

    fn core(&self) -> &FactoryCore {
        &self.shared.core
    }
}

impl ConnectionFactory for BlockingServerFactory {
    #[instrument(skip(self), fields(name = %self.core().name()))]
    fn start(&self) -> Result<(), Error> {
        let core = self.core();
        if !core.lifecycle.start() {
            return Ok(());
        }
        let pool = match core.worker_pool() {
            Ok(pool) => pool,
            Err(err) => {
                core.lifecycle.stop();
                return Err(err);
            }
        };
        if !core.has_listener() {
            info!("No listener bound to server connection factory; will not read");
            return Ok(());
        }

        let listener = match bind_listener(&core.config()) {
            Ok(listener) => listener,
            Err(err) => {
                core.lifecycle.stop();
                return Err(err);
            }
        };
        let local_addr = listener.local_addr()?;
        *self.shared.local_addr.lock() = Some(local_addr);
        info!(%local_addr, "Listening for connections");

        let shared = self.shared.clone();
        pool.execute(move || shared.accept_loop(listener));
        Ok(())
    }

    #[instrument(skip(self), fields(name = %self.core().name()))]
    fn stop(&self) {
        if !self.core().lifecycle.stop() {
            return;
        }
        // The accept loop is parked in accept(); a throwaway connection
        // wakes it so it can see the stop and drop the listener
        if let Some(addr) = self.shared.local_addr.lock().take() {
            if let Err(err) = TcpStream::connect(wake_address(addr)) {
                debug!(?err, "Failed to wake accept loop");
            }
        }
        info!("Stopped");
    }

    fn connection_ids(&self) -> Vec<String> {
        self.shared.registry.ids()
    }

    super::delegate_to_core!(core);
}

impl ServerConnectionFactory for BlockingServerFactory {
    fn local_port(&self) -> Option<u16> {
        self.shared.local_addr.lock().map(|addr| addr.port())
    }
}

impl Drop for BlockingServerFactory {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.core.lifecycle.is_running() {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    if !self.core.lifecycle.is_running() {
                        break;
                    }
                    debug!(%peer_addr, "New accept");
                    self.admit(stream);
                }
                Err(err) => match err.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
                        warn!(?err, "Transient accept error");
                    }
                    _ => {
                        if self.core.lifecycle.stop() {
                            error!(?err, "Error on server socket");
                        }
                        break;
                    }
                },
            }
        }
        info!(name = %self.core.name(), "Server socket closed");
    }

    fn admit(&self, stream: TcpStream) {
        let connection = match self.create_connection(stream) {
            Ok(connection) => connection,
            Err(err) => {
                error!(?err, "Failed to establish new incoming connection");
                return;
            }
        };
        if let Err(err) = self.registry.spawn_reader(connection) {
            error!(?err, "Failed to spawn connection reader");
        }
    }

    fn create_connection(&self, stream: TcpStream) -> Result<Arc<BlockingConnection>, Error> {
        let config = self.core.config();
        apply_socket_attributes(SockRef::from(&stream), &config, true)?;
        let session = self
            .core
            .session(true, stream.local_addr()?, stream.peer_addr()?);
        let connection = Arc::new(BlockingConnection::new(stream, session));
        self.core.wrap_connection(connection.clone())?;
        Ok(connection)
    }
}

// Connecting to an unspecified address doesn't work everywhere.
fn wake_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
