use super::reactor::{Acceptor, NioRegistry, Reactor, CONNECTION_TOKEN_START};
use super::shared::FactoryCore;
use super::{ConnectionFactory, ServerConnectionFactory};
use crate::config::ConnectionConfig;
use crate::connection::{LoopHandle, LoopRequest, NioConnection};
use crate::error::Error;
use crate::socket::{apply_socket_attributes, bind_listener};
use mio::net::{TcpListener, TcpStream};
use mio::Token;
use parking_lot::Mutex;
use socket2::SockRef;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Accepts connections on a selector loop and reads them on a worker pool.
///
/// One pool thread runs the selector; the rest serve reads, so the pool
/// needs at least two threads.
pub struct NioServerFactory {
    core: Arc<FactoryCore>,
    registry: NioRegistry,
    local_addr: Mutex<Option<SocketAddr>>,
    handle: Mutex<Option<LoopHandle>>,
    next_token: Arc<AtomicUsize>,
}

struct ServerAcceptor {
    core: Arc<FactoryCore>,
}

impl Acceptor for ServerAcceptor {
    fn create_connection(
        &self,
        stream: TcpStream,
        token: Token,
        handle: &LoopHandle,
    ) -> Result<Arc<NioConnection>, Error> {
        let config = self.core.config();
        apply_socket_attributes(SockRef::from(&stream), &config, false)?;
        let session = self
            .core
            .session(true, stream.local_addr()?, stream.peer_addr()?);
        let connection = Arc::new(NioConnection::new(
            stream,
            token,
            session,
            handle.clone(),
            config.using_direct_buffers,
        ));
        self.core.wrap_connection(connection.clone())?;
        Ok(connection)
    }
}

impl NioServerFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        let name = format!("tcp-nio-server-{}", config.port);
        Self {
            core: Arc::new(FactoryCore::new(name, config)),
            registry: NioRegistry::new(),
            local_addr: Mutex::new(None),
            handle: Mutex::new(None),
            next_token: Arc::new(AtomicUsize::new(CONNECTION_TOKEN_START)),
        }
    }

    fn core(&self) -> &FactoryCore {
        &self.core
    }

    fn listen(&self) -> Result<(), Error> {
        let pool = self.core.worker_pool()?;
        if !self.core.has_listener() {
            info!("No listener bound to server connection factory; will not read");
            return Ok(());
        }

        let config = self.core.config();
        let listener = bind_listener(&config)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let acceptor = Arc::new(ServerAcceptor {
            core: self.core.clone(),
        });
        let reactor = Reactor::new(
            self.core.clone(),
            self.registry.clone(),
            pool.clone(),
            config.idle_timeout(),
        )?
        .with_acceptor(
            TcpListener::from_std(listener),
            acceptor,
            self.next_token.clone(),
        )?;

        *self.local_addr.lock() = Some(local_addr);
        *self.handle.lock() = Some(reactor.handle());
        info!(%local_addr, "Listening for connections");
        pool.execute(move || reactor.run());
        Ok(())
    }
}

impl ConnectionFactory for NioServerFactory {
    #[instrument(skip(self), fields(name = %self.core.name()))]
    fn start(&self) -> Result<(), Error> {
        if !self.core.lifecycle.start() {
            return Ok(());
        }
        let result = self.listen();
        if result.is_err() {
            self.core.lifecycle.stop();
        }
        result
    }

    #[instrument(skip(self), fields(name = %self.core.name()))]
    fn stop(&self) {
        if !self.core.lifecycle.stop() {
            return;
        }
        // The selector drops the server socket and drains open channels
        if let Some(handle) = self.handle.lock().take() {
            handle.request(LoopRequest::Shutdown);
        }
        self.local_addr.lock().take();
        info!("Stopped");
    }

    fn connection_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    super::delegate_to_core!(core);
}

impl ServerConnectionFactory for NioServerFactory {
    fn local_port(&self) -> Option<u16> {
        self.local_addr.lock().map(|addr| addr.port())
    }
}

impl Drop for NioServerFactory {
    fn drop(&mut self) {
        self.stop();
    }
}
