//! Factory configuration.
//!
//! [`ConnectionConfig`] holds everything a connection factory needs: the
//! remote endpoint (clients) or bind address (servers), socket tuning, the
//! worker pool size and single-use semantics. It can be built in code or read
//! from a [`config::Config`] with optional namespacing, where `<name>.<key>`
//! takes precedence over `<key>`.

use crate::error::Error;
use ::config::Config;
use std::time::Duration;

pub(crate) const DEFAULT_POOL_SIZE: usize = 5;
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE: usize = 2048;

// ============================================================================
// Namespaced Lookups
// ============================================================================

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, config::ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<usize, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key))
}

pub(crate) fn get_namespaced_u64(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<u64, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u64>(key))
}

pub(crate) fn get_namespaced_bool(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<bool, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_bool)
}

pub(crate) fn get_namespaced_string(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<String, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_string)
}

// Missing keys fall back to defaults; malformed values are errors.
fn optional<T>(result: Result<T, config::ConfigError>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Connection and socket settings shared by all factory variants.
///
/// Unset socket options (`None`) leave the operating system default in
/// place. `so_timeout` is the read timeout on blocking sockets and the idle
/// timeout (and poll interval bound) on selector sockets.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Remote host for client factories.
    pub host: String,
    /// Remote port for clients, bind port for servers (0 = ephemeral).
    pub port: u16,
    /// Local interface a server binds to; all interfaces when `None`.
    pub local_address: Option<String>,
    pub so_timeout: Option<Duration>,
    pub so_send_buffer_size: Option<usize>,
    pub so_receive_buffer_size: Option<usize>,
    pub so_tcp_no_delay: bool,
    pub so_linger: Option<Duration>,
    pub so_keep_alive: bool,
    pub so_traffic_class: Option<u32>,
    /// Worker pool size; also the listen backlog for servers.
    pub pool_size: usize,
    /// Use each connection for a single request/response exchange.
    pub single_use: bool,
    /// Keep one read buffer per connection instead of allocating per read.
    pub using_direct_buffers: bool,
    /// Largest frame the default codecs accept.
    pub max_message_size: usize,
    /// Close a single-use server connection whose reply never came when the
    /// read times out.
    pub close_unanswered_on_timeout: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            local_address: None,
            so_timeout: None,
            so_send_buffer_size: None,
            so_receive_buffer_size: None,
            so_tcp_no_delay: false,
            so_linger: None,
            so_keep_alive: false,
            so_traffic_class: None,
            pool_size: DEFAULT_POOL_SIZE,
            single_use: false,
            using_direct_buffers: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            close_unanswered_on_timeout: true,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for a client connecting to `host:port`.
    pub fn client(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Configuration for a server listening on `port`.
    pub fn server(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Reads a configuration from `config`, using `name` as the namespace.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let mut cfg = Self::default();
        if let Some(host) = optional(get_namespaced_string(config, name, "host"))? {
            cfg.host = host;
        }
        if let Some(port) = optional(get_namespaced_usize(config, name, "port"))? {
            cfg.port = u16::try_from(port).map_err(|_| Error::InvalidAddress)?;
        }
        cfg.local_address = optional(get_namespaced_string(config, name, "local_address"))?;
        cfg.so_timeout = optional(get_namespaced_u64(config, name, "so_timeout_ms"))?
            .map(Duration::from_millis);
        cfg.so_send_buffer_size = optional(get_namespaced_usize(config, name, "so_send_buffer_size"))?;
        cfg.so_receive_buffer_size =
            optional(get_namespaced_usize(config, name, "so_receive_buffer_size"))?;
        cfg.so_tcp_no_delay =
            optional(get_namespaced_bool(config, name, "so_tcp_no_delay"))?.unwrap_or(false);
        cfg.so_linger = optional(get_namespaced_u64(config, name, "so_linger_secs"))?
            .map(Duration::from_secs);
        cfg.so_keep_alive =
            optional(get_namespaced_bool(config, name, "so_keep_alive"))?.unwrap_or(false);
        cfg.so_traffic_class = optional(get_namespaced_u64(config, name, "so_traffic_class"))?
            .map(|tc| {
                u32::try_from(tc).map_err(|_| {
                    config::ConfigError::Message(format!("so_traffic_class {tc} is out of range"))
                })
            })
            .transpose()?;
        cfg.pool_size =
            optional(get_namespaced_usize(config, name, "pool_size"))?.unwrap_or(DEFAULT_POOL_SIZE);
        cfg.single_use = optional(get_namespaced_bool(config, name, "single_use"))?.unwrap_or(false);
        cfg.using_direct_buffers =
            optional(get_namespaced_bool(config, name, "using_direct_buffers"))?.unwrap_or(false);
        cfg.max_message_size = optional(get_namespaced_usize(config, name, "max_message_size"))?
            .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE);
        cfg.close_unanswered_on_timeout =
            optional(get_namespaced_bool(config, name, "close_unanswered_on_timeout"))?
                .unwrap_or(true);
        Ok(cfg)
    }

    pub fn with_so_timeout(mut self, timeout: Duration) -> Self {
        self.so_timeout = Some(timeout);
        self
    }

    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.so_send_buffer_size = Some(size);
        self
    }

    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.so_receive_buffer_size = Some(size);
        self
    }

    pub fn with_tcp_no_delay(mut self, no_delay: bool) -> Self {
        self.so_tcp_no_delay = no_delay;
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.so_linger = Some(linger);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.so_keep_alive = keep_alive;
        self
    }

    pub fn with_traffic_class(mut self, traffic_class: u32) -> Self {
        self.so_traffic_class = Some(traffic_class);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_single_use(mut self, single_use: bool) -> Self {
        self.single_use = single_use;
        self
    }

    pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Idle timeout for selector factories; `None` when unset or zero.
    pub(crate) fn idle_timeout(&self) -> Option<Duration> {
        self.so_timeout.filter(|t| !t.is_zero())
    }
}
