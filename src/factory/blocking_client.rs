use super::shared::{ConnectionRegistry, FactoryCore};
use super::{ClientConnectionFactory, ConnectionFactory};
use crate::config::ConnectionConfig;
use crate::connection::{BlockingConnection, Connection};
use crate::error::Error;
use crate::socket::{apply_socket_attributes, remote_address};
use parking_lot::Mutex;
use socket2::SockRef;
use std::net::TcpStream;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Opens blocking client connections, each read by its own thread.
///
/// Pooled factories hand out one shared connection until it closes;
/// single-use factories open a new socket on every request.
pub struct BlockingClientFactory {
    core: FactoryCore,
    registry: ConnectionRegistry<String, BlockingConnection>,
    shared_connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl BlockingClientFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        let name = format!("tcp-net-client-{}:{}", config.host, config.port);
        Self {
            core: FactoryCore::new(name, config),
            registry: ConnectionRegistry::new(),
            shared_connection: Mutex::new(None),
        }
    }

    fn core(&self) -> &FactoryCore {
        &self.core
    }

    #[instrument(skip(self), fields(name = %self.core.name()))]
    fn open(&self) -> Result<Arc<dyn Connection>, Error> {
        let config = self.core.config();
        let addr = remote_address(&config)?;
        debug!(%addr, "Opening new socket connection");
        let stream = match config.so_timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        apply_socket_attributes(SockRef::from(&stream), &config, true)?;

        let session = self
            .core
            .session(false, stream.local_addr()?, stream.peer_addr()?);
        let base = Arc::new(BlockingConnection::new(stream, session));
        let wrapped = self.core.wrap_connection(base.clone())?;

        self.registry.retain_open();
        if base.listener().is_some() || base.is_single_use() {
            self.registry.spawn_reader(base)?;
        } else {
            self.registry.insert(base.connection_id().to_string(), base);
        }
        Ok(wrapped)
    }
}

impl ConnectionFactory for BlockingClientFactory {
    fn start(&self) -> Result<(), Error> {
        if self.core.lifecycle.start() {
            info!(name = %self.core.name(), "Started");
        }
        Ok(())
    }

    fn stop(&self) {
        if !self.core.lifecycle.stop() {
            return;
        }
        // Open connections drain on their own; only forget the shared one
        self.shared_connection.lock().take();
        info!(name = %self.core.name(), "Stopped");
    }

    fn connection_ids(&self) -> Vec<String> {
        self.registry.retain_open();
        self.registry.ids()
    }

    super::delegate_to_core!(core);
}

impl ClientConnectionFactory for BlockingClientFactory {
    fn get_connection(&self) -> Result<Arc<dyn Connection>, Error> {
        if !self.core.lifecycle.is_running() {
            return Err(Error::NotRunning);
        }
        if self.core.config().single_use {
            return self.open();
        }

        let mut shared = self.shared_connection.lock();
        if let Some(connection) = shared.as_ref().filter(|c| c.is_open()) {
            return Ok(connection.clone());
        }
        match self.open() {
            Ok(connection) => {
                *shared = Some(connection.clone());
                Ok(connection)
            }
            Err(err) => {
                error!(name = %self.core.name(), ?err, "Failed to open connection");
                Err(err)
            }
        }
    }
}

impl Drop for BlockingClientFactory {
    fn drop(&mut self) {
        self.stop();
    }
}
