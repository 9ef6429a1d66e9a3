//! Pool and transport configuration

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

/// 16 MiB, the largest frame or message the transport accepts by default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Settings for the socket the factory opens.
///
/// # Examples
///
/// ```
/// use esox_connectionpool::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::new("127.0.0.1:9000")
///     .with_connect_timeout(Duration::from_secs(1));
///
/// assert_eq!(config.address, "127.0.0.1:9000");
/// assert_eq!(config.socket_timeout, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportConfig {
    /// `host:port` of the RPC endpoint
    pub address: String,

    /// Maximum time spent establishing the TCP connection
    pub connect_timeout: Duration,

    /// Read/write timeout applied to every frame operation
    pub socket_timeout: Duration,

    /// Largest frame accepted in either direction
    pub max_frame_size: usize,

    /// Capacity of the read and write buffers
    pub buffer_size: usize,

    /// Disable Nagle's algorithm on the socket
    pub nodelay: bool,
}

impl TransportConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            buffer_size: 8192,
            nodelay: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_connectionpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new("127.0.0.1:9000")
///     .with_max_idle(5)
///     .with_max_active(10)
///     .with_idle_timeout(Duration::from_secs(120));
///
/// assert_eq!(config.max_active, 10);
/// assert_eq!(config.eviction_interval(), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Socket settings, including the fixed endpoint address
    pub transport: TransportConfig,

    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,

    /// Maximum number of connections borrowed (or being created) at once
    pub max_active: usize,

    /// Idle connections unused for longer than this are evicted
    pub idle_timeout: Duration,

    /// Wait for capacity instead of failing when `max_active` is reached
    pub block_when_exhausted: bool,

    /// Validate idle connections before handing them out
    pub test_on_borrow: bool,

    /// Validate freshly created connections
    pub test_on_create: bool,

    /// Validate connections when they are returned
    pub test_on_return: bool,

    /// Validate idle connections during eviction sweeps
    pub test_while_idle: bool,

    /// Time between eviction sweeps; `None` means `idle_timeout / 2`
    pub eviction_interval: Option<Duration>,

    /// Upper bound on idle connections validated per sweep; `None` validates all
    pub num_tests_per_eviction_run: Option<usize>,

    /// Default wait used by `borrow()`; `None` waits indefinitely
    pub borrow_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Create a configuration for `address` with default values
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_transport(TransportConfig::new(address))
    }

    /// Create a configuration around existing transport settings
    pub fn with_transport(transport: TransportConfig) -> Self {
        Self {
            transport,
            max_idle: 5,
            max_active: 10,
            idle_timeout: Duration::from_secs(120),
            block_when_exhausted: true,
            test_on_borrow: true,
            test_on_create: true,
            test_on_return: false,
            test_while_idle: true,
            eviction_interval: None,
            num_tests_per_eviction_run: Some(3),
            borrow_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Address of the RPC endpoint
    pub fn address(&self) -> &str {
        &self.transport.address
    }

    /// Effective time between eviction sweeps
    pub fn eviction_interval(&self) -> Duration {
        self.eviction_interval.unwrap_or(self.idle_timeout / 2)
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_block_when_exhausted(mut self, block: bool) -> Self {
        self.block_when_exhausted = block;
        self
    }

    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    pub fn with_test_on_create(mut self, test: bool) -> Self {
        self.test_on_create = test;
        self
    }

    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }

    pub fn with_test_while_idle(mut self, test: bool) -> Self {
        self.test_while_idle = test;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = Some(interval);
        self
    }

    pub fn with_num_tests_per_eviction_run(mut self, count: Option<usize>) -> Self {
        self.num_tests_per_eviction_run = count;
        self
    }

    pub fn with_borrow_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    /// Check the values a pool cannot run with
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_active == 0 {
            return Err(PoolError::InvalidConfig(
                "max_active must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        if self.eviction_interval().is_zero() {
            return Err(PoolError::InvalidConfig(
                "eviction_interval must be greater than zero".to_string(),
            ));
        }
        if self.transport.address.is_empty() {
            return Err(PoolError::InvalidConfig("address is empty".to_string()));
        }
        Ok(())
    }
}
