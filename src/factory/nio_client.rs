use super::reactor::{NioRegistry, Reactor, CONNECTION_TOKEN_START};
use super::shared::FactoryCore;
use super::{ClientConnectionFactory, ConnectionFactory};
use crate::config::ConnectionConfig;
use crate::connection::{Connection, LoopHandle, LoopRequest, NioConnection};
use crate::error::Error;
use crate::socket::{apply_socket_attributes, remote_address};
use mio::Token;
use parking_lot::Mutex;
use socket2::SockRef;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Opens client connections serviced by a selector loop.
///
/// Connecting happens on the caller's thread; the new channel is then handed
/// to the selector, which owns it from there on.
pub struct NioClientFactory {
    core: Arc<FactoryCore>,
    registry: NioRegistry,
    handle: Mutex<Option<LoopHandle>>,
    shared_connection: Mutex<Option<Arc<dyn Connection>>>,
    next_token: AtomicUsize,
}

impl NioClientFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        let name = format!("tcp-nio-client-{}:{}", config.host, config.port);
        Self {
            core: Arc::new(FactoryCore::new(name, config)),
            registry: NioRegistry::new(),
            handle: Mutex::new(None),
            shared_connection: Mutex::new(None),
            next_token: AtomicUsize::new(CONNECTION_TOKEN_START),
        }
    }

    fn core(&self) -> &FactoryCore {
        &self.core
    }

    #[instrument(skip(self, handle), fields(name = %self.core.name()))]
    fn open(&self, handle: &LoopHandle) -> Result<Arc<dyn Connection>, Error> {
        let config = self.core.config();
        let addr = remote_address(&config)?;
        debug!(%addr, "Opening new socket channel connection");
        let stream = match config.so_timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => std::net::TcpStream::connect_timeout(&addr, timeout)?,
            None => std::net::TcpStream::connect(addr)?,
        };
        apply_socket_attributes(SockRef::from(&stream), &config, false)?;
        stream.set_nonblocking(true)?;

        let session = self
            .core
            .session(false, stream.local_addr()?, stream.peer_addr()?);
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(NioConnection::new(
            mio::net::TcpStream::from_std(stream),
            token,
            session,
            handle.clone(),
            config.using_direct_buffers,
        ));
        let wrapped = self.core.wrap_connection(connection.clone())?;
        handle.request(LoopRequest::Register(connection));
        Ok(wrapped)
    }
}

impl ConnectionFactory for NioClientFactory {
    #[instrument(skip(self), fields(name = %self.core.name()))]
    fn start(&self) -> Result<(), Error> {
        if !self.core.lifecycle.start() {
            return Ok(());
        }
        let started = self.core.worker_pool().and_then(|pool| {
            let reactor = Reactor::new(
                self.core.clone(),
                self.registry.clone(),
                pool.clone(),
                self.core.config().idle_timeout(),
            )?;
            *self.handle.lock() = Some(reactor.handle());
            pool.execute(move || reactor.run());
            Ok(())
        });
        match started {
            Ok(()) => info!("Started"),
            Err(_) => {
                self.core.lifecycle.stop();
            }
        }
        started
    }

    #[instrument(skip(self), fields(name = %self.core.name()))]
    fn stop(&self) {
        if !self.core.lifecycle.stop() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            handle.request(LoopRequest::Shutdown);
        }
        self.shared_connection.lock().take();
        info!("Stopped");
    }

    fn connection_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    super::delegate_to_core!(core);
}

impl ClientConnectionFactory for NioClientFactory {
    fn get_connection(&self) -> Result<Arc<dyn Connection>, Error> {
        let handle = match self.handle.lock().as_ref() {
            Some(handle) if self.core.lifecycle.is_running() => handle.clone(),
            _ => return Err(Error::NotRunning),
        };
        if self.core.config().single_use {
            return self.open(&handle);
        }

        let mut shared = self.shared_connection.lock();
        if let Some(connection) = shared.as_ref().filter(|c| c.is_open()) {
            return Ok(connection.clone());
        }
        match self.open(&handle) {
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

impl Drop for NioClientFactory {
    fn drop(&mut self) {
        self.stop();
    }
}
