//! # EsoxSolutions.ConnectionPool
//!
//! Async, bounded connection pool for RPC transports. Opening an RPC
//! connection means a socket connect plus protocol negotiation; the pool
//! keeps live connections around and hands them out under a concurrency
//! limit, discarding the ones that have gone stale or broken.
//!
//! ## Features
//!
//! - LIFO idle set bounded by `max_idle`, borrowed connections bounded by `max_active`
//! - Blocking or fail-fast behavior when exhausted, with deadlines and cancellation
//! - Validation on create, borrow, return and while idle
//! - Background eviction of idle connections
//! - Return / invalidate semantics enforced by ownership
//! - Health monitoring and metrics
//! - Prometheus metrics export
//! - TCP transport with length-prefixed framing
//!
//! ## Quick Start
//!
//! ```no_run
//! use esox_connectionpool::{ConnectionPool, PoolConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> esox_connectionpool::PoolResult<()> {
//! let config = PoolConfig::new("127.0.0.1:9000")
//!     .with_max_idle(5)
//!     .with_max_active(10)
//!     .with_idle_timeout(Duration::from_secs(120));
//! let pool = ConnectionPool::connect(config)?;
//!
//! let conn = pool.borrow().await?;
//! // ... perform the RPC call over conn.transport_mut() ...
//! pool.return_connection(conn).await?;
//!
//! pool.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod errors;
mod eviction;
mod factory;
mod health;
mod metrics;
mod pool;
mod transport;

pub use config::{PoolConfig, TransportConfig, DEFAULT_MAX_FRAME_SIZE};
pub use connection::PooledConnection;
pub use errors::{PoolError, PoolResult, TransportError};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use factory::{ConnectionFactory, TcpConnectionFactory};
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{BorrowContext, Connection, ConnectionPool, FactoryConnection};
pub use transport::{TcpTransport, Transport};

/// Re-exported so callers can build a [`BorrowContext`] without depending on tokio-util
pub use tokio_util::sync::CancellationToken;
