use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use crate::{
    error::{HarnessError, Result},
    secure::SessionFactory,
};

pub const DEFAULT_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Configuration for [`EventLoopServer`](crate::EventLoopServer).
///
/// Only the port is required. Use `ServerConfig::builder()` for the rest.
///
/// ## Thread count
///
/// `thread_count` is accepted for parity with multi-threaded servers but the
/// event loop always runs on the single thread that calls `start()`. The
/// value is logged and otherwise ignored.
#[derive(Clone)]
pub struct ServerConfig {
    /// Interface to bind to
    pub host: IpAddr,
    /// Listening port, 0 picks any free port
    pub port: u16,
    /// Ignored hint, see type docs
    pub thread_count: Option<usize>,
    /// Size of the scratch buffer used per read call
    pub buffer_size: usize,
    /// Upper bound on a single poll
    pub poll_timeout: Duration,
    /// Events fetched per poll
    pub events_capacity: usize,
    /// Enable TCP_NODELAY on accepted connections
    pub no_delay: bool,
    /// Wraps every accepted connection in a secure session when set
    pub session_factory: Option<Arc<dyn SessionFactory>>,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Create a new builder for ServerConfig
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            thread_count: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            no_delay: true,
            session_factory: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address())
            .field("thread_count", &self.thread_count)
            .field("buffer_size", &self.buffer_size)
            .field("poll_timeout", &self.poll_timeout)
            .field("events_capacity", &self.events_capacity)
            .field("no_delay", &self.no_delay)
            .field("secure", &self.session_factory.is_some())
            .finish()
    }
}

/// Builder for ServerConfig.
///
/// Unset fields fall back to `ServerConfig::default()`.
#[derive(Default)]
pub struct ServerConfigBuilder {
    host: Option<IpAddr>,
    port: Option<u16>,
    thread_count: Option<usize>,
    buffer_size: Option<usize>,
    poll_timeout: Option<Duration>,
    events_capacity: Option<usize>,
    no_delay: Option<bool>,
    session_factory: Option<Arc<dyn SessionFactory>>,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Accepted and ignored, the loop is single-threaded
    pub fn thread_count(mut self, threads: usize) -> Self {
        self.thread_count = Some(threads);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.session_factory = Some(factory);
        self
    }

    /// Build the ServerConfig
    ///
    /// ## Errors
    ///
    /// Returns [`HarnessError::Configuration`] if `buffer_size` or
    /// `events_capacity` is zero.
    pub fn build(self) -> Result<ServerConfig> {
        let default = ServerConfig::default();
        let config = ServerConfig {
            host: self.host.unwrap_or(default.host),
            port: self.port.unwrap_or(default.port),
            thread_count: self.thread_count.or(default.thread_count),
            buffer_size: self.buffer_size.unwrap_or(default.buffer_size),
            poll_timeout: self.poll_timeout.unwrap_or(default.poll_timeout),
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            session_factory: self.session_factory.or(default.session_factory),
        };

        if config.buffer_size == 0 {
            return Err(HarnessError::Configuration(
                "buffer_size must be greater than zero".into(),
            ));
        }
        if config.events_capacity == 0 {
            return Err(HarnessError::Configuration(
                "events_capacity must be greater than zero".into(),
            ));
        }
        Ok(config)
    }
}
