// Configuration and registrations shared by every factory variant.

use crate::codec::{Codec, CrLfCodec};
use crate::config::ConnectionConfig;
use crate::connection::{
    BlockingConnection, Connection, InterceptorChain, InterceptorFactory, Listener, Registration,
    Sender, Session,
};
use crate::error::Error;
use crate::lifecycle::Lifecycle;
use crate::pool::WorkerPool;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct FactoryCore {
    name: String,
    config: RwLock<ConnectionConfig>,
    codec: RwLock<Arc<dyn Codec>>,
    interceptors: RwLock<InterceptorChain>,
    listener: Registration<dyn Listener>,
    sender: Registration<dyn Sender>,
    pool: Mutex<Option<WorkerPool>>,
    pub lifecycle: Lifecycle,
}

impl FactoryCore {
    pub fn new(name: String, config: ConnectionConfig) -> Self {
        let codec: Arc<dyn Codec> = Arc::new(CrLfCodec::new(config.max_message_size));
        Self {
            name,
            config: RwLock::new(config),
            codec: RwLock::new(codec),
            interceptors: RwLock::new(InterceptorChain::new()),
            listener: Registration::new(),
            sender: Registration::new(),
            pool: Mutex::new(None),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_stopped(&self) -> Result<(), Error> {
        if self.lifecycle.is_running() {
            Err(Error::AlreadyRunning)
        } else {
            Ok(())
        }
    }

    pub fn configure<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut ConnectionConfig),
    {
        self.ensure_stopped()?;
        f(&mut *self.config.write());
        Ok(())
    }

    pub fn config(&self) -> ConnectionConfig {
        self.config.read().clone()
    }

    pub fn set_codec(&self, codec: Arc<dyn Codec>) -> Result<(), Error> {
        self.ensure_stopped()?;
        *self.codec.write() = codec;
        Ok(())
    }

    pub fn add_interceptor(&self, factory: Arc<dyn InterceptorFactory>) -> Result<(), Error> {
        self.ensure_stopped()?;
        self.interceptors.write().push(factory);
        Ok(())
    }

    pub fn set_worker_pool(&self, pool: WorkerPool) -> Result<(), Error> {
        self.ensure_stopped()?;
        *self.pool.lock() = Some(pool);
        Ok(())
    }

    /// The supplied pool, or a new one sized by `pool_size`.
    pub fn worker_pool(&self) -> Result<WorkerPool, Error> {
        let mut pool = self.pool.lock();
        if let Some(pool) = pool.as_ref() {
            return Ok(pool.clone());
        }
        let created = WorkerPool::new(self.config.read().pool_size, &self.name)?;
        debug!(name = %self.name, size = created.size(), "Created worker pool");
        *pool = Some(created.clone());
        Ok(created)
    }

    pub fn register_listener(&self, listener: Arc<dyn Listener>) -> Result<(), Error> {
        if self.listener.set(listener) {
            Ok(())
        } else {
            Err(Error::ListenerAlreadyRegistered)
        }
    }

    pub fn register_sender(&self, sender: Arc<dyn Sender>) -> Result<(), Error> {
        if self.sender.set(sender) {
            Ok(())
        } else {
            Err(Error::SenderAlreadyRegistered)
        }
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_set()
    }

    pub fn session(&self, server: bool, local_addr: SocketAddr, peer_addr: SocketAddr) -> Session {
        Session::new(
            &self.config.read(),
            self.codec.read().clone(),
            server,
            local_addr,
            peer_addr,
        )
    }

    /// Applies the interceptor chain, then registers the factory's own
    /// listener and sender on the outermost connection.
    pub fn wrap_connection(&self, base: Arc<dyn Connection>) -> Result<Arc<dyn Connection>, Error> {
        let sender = self.sender.get();
        let wrapped = self.interceptors.read().wrap(base, sender.is_some())?;
        if let Some(listener) = self.listener.get() {
            wrapped.register_listener(listener)?;
        }
        if let Some(sender) = sender {
            wrapped.register_sender(sender.clone())?;
            sender.add_new_connection(wrapped.clone());
        }
        Ok(wrapped)
    }
}

// ============================================================================
// Connection Registry
// ============================================================================

// Tracks a factory's live connections. Shared with the I/O loop that owns
// insertions and removals; everyone else only reads.
#[derive(Debug)]
pub(crate) struct ConnectionRegistry<K, C> {
    entries: Arc<Mutex<HashMap<K, Arc<C>>>>,
}

impl<K, C> Clone for ConnectionRegistry<K, C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, C> ConnectionRegistry<K, C>
where
    K: Eq + Hash + Clone,
    C: Connection,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn insert(&self, key: K, connection: Arc<C>) {
        self.entries.lock().insert(key, connection);
    }

    pub fn remove(&self, key: &K) -> Option<Arc<C>> {
        self.entries.lock().remove(key)
    }

    pub fn get(&self, key: &K) -> Option<Arc<C>> {
        self.entries.lock().get(key).cloned()
    }

    /// Ids of every tracked connection.
    pub fn ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .values()
            .map(|connection| connection.connection_id().to_string())
            .collect()
    }

    /// Drops entries whose connection has closed.
    pub fn retain_open(&self) {
        self.entries.lock().retain(|_, connection| connection.is_open());
    }
}

type ReaderJob = Box<dyn FnOnce() + Send + 'static>;

impl ConnectionRegistry<String, BlockingConnection> {
    /// Tracks `connection` and starts its reader thread, which forgets the
    /// connection once the peer or a timeout ends it.
    pub fn spawn_reader(&self, connection: Arc<BlockingConnection>) -> io::Result<()> {
        self.spawn_reader_with(connection, |name, job| {
            thread::Builder::new().name(name).spawn(job).map(drop)
        })
    }

    // A connection without a reader is useless: a failed spawn closes it and
    // drops the entry again.
    fn spawn_reader_with<S>(&self, connection: Arc<BlockingConnection>, spawn: S) -> io::Result<()>
    where
        S: FnOnce(String, ReaderJob) -> io::Result<()>,
    {
        let id = connection.connection_id().to_string();
        self.insert(id.clone(), connection.clone());

        let registry = self.clone();
        let reader = connection.clone();
        let reader_id = id.clone();
        let job: ReaderJob = Box::new(move || {
            reader.run();
            registry.remove(&reader_id);
        });
        if let Err(err) = spawn(format!("tcp-net-conn-{id}"), job) {
            connection.close();
            self.remove(&id);
            return Err(err);
        }
        Ok(())
    }
}
