//! Core connection pool implementation

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{EvictionPolicy, EvictionReport, Evictor};
use crate::factory::{ConnectionFactory, TcpConnectionFactory};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::transport::Transport;

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The connection type produced by a factory
pub type FactoryConnection<F> =
    PooledConnection<<F as ConnectionFactory>::Transport, <F as ConnectionFactory>::Client>;

/// Deadline and cancellation for a single borrow
///
/// # Examples
///
/// ```
/// use esox_connectionpool::BorrowContext;
/// use std::time::Duration;
///
/// let ctx = BorrowContext::new().with_timeout(Duration::from_millis(250));
/// assert_eq!(ctx.timeout(), Some(Duration::from_millis(250)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BorrowContext {
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl BorrowContext {
    /// No deadline, no cancellation
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`PoolError::Timeout`] if no connection is ready within `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail with [`PoolError::Cancelled`] once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A borrowed connection.
///
/// Hand it back with [`ConnectionPool::return_connection`] after a
/// successful call, or [`ConnectionPool::invalidate`] after a failure.
/// A lease dropped without either frees its slot and is destroyed in
/// the background.
pub struct Connection<F: ConnectionFactory> {
    conn: Option<FactoryConnection<F>>,
    pool: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Deref for Connection<F> {
    type Target = PooledConnection<F::Transport, F::Client>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already released")
    }
}

impl<F: ConnectionFactory> DerefMut for Connection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already released")
    }
}

impl<F: ConnectionFactory> Drop for Connection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(connection = conn.id(), "connection dropped without return, destroying");
            self.pool.release_slot();
            self.pool.destroy_detached(conn);
        }
    }
}

pub(crate) struct PoolState<T, C> {
    /// Stack of idle connections; the most recently returned is on top
    pub idle: Vec<PooledConnection<T, C>>,
    /// Borrowed connections plus connections being created for a borrower
    pub active: usize,
    pub closed: bool,
}

pub(crate) struct PoolInner<F: ConnectionFactory> {
    pub factory: Arc<F>,
    pub config: PoolConfig,
    pub eviction: EvictionPolicy,
    pub state: Mutex<PoolState<F::Transport, F::Client>>,
    pub capacity_freed: Notify,
    pub metrics: MetricsTracker,
    pub evictor: tokio::sync::Mutex<Option<Evictor>>,
}

/// An active slot reserved under the pool lock.
///
/// Released on drop unless ownership moved to a lease, so a failed,
/// cancelled or timed-out borrow never leaks capacity.
struct ActiveSlot<'a, F: ConnectionFactory> {
    pool: &'a PoolInner<F>,
    held: bool,
}

impl<'a, F: ConnectionFactory> ActiveSlot<'a, F> {
    fn new(pool: &'a PoolInner<F>) -> Self {
        Self { pool, held: true }
    }

    fn disarm(mut self) {
        self.held = false;
    }
}

impl<F: ConnectionFactory> Drop for ActiveSlot<'_, F> {
    fn drop(&mut self) {
        if self.held {
            self.pool.release_slot();
        }
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn release_slot(&self) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.capacity_freed.notify_waiters();
    }

    async fn acquire(self: &Arc<Self>) -> PoolResult<Connection<F>> {
        let mut waited = false;
        loop {
            // registered before the capacity check so a release in between is not missed
            let notified = self.capacity_freed.notified();
            tokio::pin!(notified);

            let reserved = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PoolError::PoolClosed);
                }
                if state.active < self.config.max_active {
                    state.active += 1;
                    Some(state.idle.pop())
                } else {
                    notified.as_mut().enable();
                    None
                }
            };

            match reserved {
                Some(candidate) => {
                    let slot = ActiveSlot::new(self);
                    let conn = self.checkout(candidate).await?;
                    slot.disarm();
                    MetricsTracker::incr(&self.metrics.total_borrowed);
                    return Ok(Connection {
                        conn: Some(conn),
                        pool: Arc::clone(self),
                    });
                }
                None => {
                    if !waited {
                        MetricsTracker::incr(&self.metrics.exhausted_events);
                        waited = true;
                    }
                    if !self.config.block_when_exhausted {
                        return Err(PoolError::PoolExhausted {
                            max_active: self.config.max_active,
                        });
                    }
                    trace!(max_active = self.config.max_active, "pool exhausted, waiting");
                    notified.await;
                }
            }
        }
    }

    /// Turn a reserved slot into a usable connection: idle candidates first,
    /// then a fresh one from the factory.
    async fn checkout(&self, mut candidate: Option<FactoryConnection<F>>) -> PoolResult<FactoryConnection<F>> {
        while let Some(mut conn) = candidate.take() {
            if self.prepare_idle(&mut conn).await {
                return Ok(conn);
            }
            self.destroy(conn).await;
            candidate = self.state.lock().idle.pop();
        }
        self.create().await
    }

    async fn prepare_idle(&self, conn: &mut FactoryConnection<F>) -> bool {
        if self.config.test_on_borrow {
            if !self.factory.validate(conn).await {
                MetricsTracker::incr(&self.metrics.validation_failures);
                debug!(connection = conn.id(), "idle connection failed validation on borrow");
                return false;
            }
            conn.mark_validated();
        }
        if let Err(e) = self.factory.activate(conn).await {
            debug!(connection = conn.id(), "failed to activate idle connection: {}", e);
            return false;
        }
        true
    }

    async fn create(&self) -> PoolResult<FactoryConnection<F>> {
        let mut conn = match self.factory.create().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(address = self.factory.address(), "failed to create connection: {}", e);
                return Err(e);
            }
        };
        MetricsTracker::incr(&self.metrics.connections_created);

        if self.config.test_on_create {
            if !self.factory.validate(&conn).await {
                MetricsTracker::incr(&self.metrics.validation_failures);
                self.destroy(conn).await;
                return Err(PoolError::ValidationFailed);
            }
            conn.mark_validated();
        }
        if let Err(e) = self.factory.activate(&mut conn).await {
            self.destroy(conn).await;
            return Err(e);
        }

        let closed = self.state.lock().closed;
        if closed {
            self.destroy(conn).await;
            return Err(PoolError::PoolClosed);
        }
        Ok(conn)
    }

    async fn put_back(&self, mut conn: FactoryConnection<F>) {
        let slot = ActiveSlot::new(self);

        let mut healthy = conn.transport().is_open();
        if healthy && self.config.test_on_return {
            healthy = self.factory.validate(&conn).await;
            if healthy {
                conn.mark_validated();
            } else {
                MetricsTracker::incr(&self.metrics.validation_failures);
            }
        }
        if healthy {
            if let Err(e) = self.factory.passivate(&mut conn).await {
                debug!(connection = conn.id(), "failed to passivate connection: {}", e);
                healthy = false;
            }
        }

        let rejected = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            if healthy && !state.closed && state.idle.len() < self.config.max_idle {
                conn.touch();
                state.idle.push(conn);
                None
            } else {
                Some(conn)
            }
        };
        slot.disarm();
        self.capacity_freed.notify_waiters();
        MetricsTracker::incr(&self.metrics.total_returned);

        if let Some(conn) = rejected {
            self.destroy(conn).await;
        }
    }

    async fn discard(&self, conn: FactoryConnection<F>) {
        self.release_slot();
        MetricsTracker::incr(&self.metrics.total_invalidated);
        self.destroy(conn).await;
    }

    pub(crate) async fn destroy(&self, conn: FactoryConnection<F>) {
        trace!(connection = conn.id(), "destroying connection");
        self.factory.destroy(conn).await;
        MetricsTracker::incr(&self.metrics.connections_destroyed);
    }

    fn destroy_detached(&self, conn: FactoryConnection<F>) {
        MetricsTracker::incr(&self.metrics.connections_destroyed);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let factory = Arc::clone(&self.factory);
                runtime.spawn(async move {
                    factory.destroy(conn).await;
                });
            }
            // no runtime to close on; dropping the transport releases the socket
            Err(_) => drop(conn),
        }
    }
}

impl<F: ConnectionFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        if let Some(evictor) = self.evictor.get_mut().take() {
            evictor.cancel();
        }
    }
}

/// Bounded pool of RPC connections to a single endpoint.
///
/// Cloning the pool clones a handle; all clones share the same connections.
///
/// # Examples
///
/// ```no_run
/// use esox_connectionpool::{ConnectionPool, PoolConfig};
///
/// # async fn run() -> esox_connectionpool::PoolResult<()> {
/// let pool = ConnectionPool::connect(PoolConfig::new("127.0.0.1:9000"))?;
///
/// let mut conn = pool.borrow().await?;
/// match conn.transport_mut().write_frame(b"ping").await {
///     Ok(()) => pool.return_connection(conn).await?,
///     Err(_) => pool.invalidate(conn).await?,
/// }
///
/// pool.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionPool<TcpConnectionFactory> {
    /// Pool of plain TCP connections to `config.transport.address`
    pub fn connect(config: PoolConfig) -> PoolResult<Self> {
        let factory = TcpConnectionFactory::new(config.transport.clone());
        Self::new(factory, config)
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool and start its evictor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(factory: F, config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PoolError::InvalidConfig("a connection pool must be created inside a tokio runtime".to_string())
        })?;

        let interval = config.eviction_interval();
        let inner = Arc::new_cyclic(|pool| PoolInner {
            eviction: EvictionPolicy::from_config(&config),
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.max_idle),
                active: 0,
                closed: false,
            }),
            factory: Arc::new(factory),
            capacity_freed: Notify::new(),
            metrics: MetricsTracker::new(),
            evictor: tokio::sync::Mutex::new(Some(Evictor::spawn(&runtime, pool.clone(), interval))),
            config,
        });

        debug!(
            address = inner.factory.address(),
            max_active = inner.config.max_active,
            max_idle = inner.config.max_idle,
            "connection pool created"
        );
        Ok(Self { inner })
    }

    /// Borrow a connection, waiting at most the configured `borrow_timeout`
    pub async fn borrow(&self) -> PoolResult<Connection<F>> {
        let ctx = BorrowContext {
            timeout: self.inner.config.borrow_timeout,
            cancellation: None,
        };
        self.borrow_with(&ctx).await
    }

    /// Borrow a connection under an explicit deadline and cancellation token.
    ///
    /// Dropping the returned future is also a cancellation; in every case the
    /// reserved slot is released.
    pub async fn borrow_with(&self, ctx: &BorrowContext) -> PoolResult<Connection<F>> {
        let acquire = self.inner.acquire();
        let bounded = async {
            match ctx.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, acquire).await {
                    Ok(result) => result,
                    Err(_) => {
                        MetricsTracker::incr(&self.inner.metrics.timeouts);
                        Err(PoolError::Timeout(timeout))
                    }
                },
                None => acquire.await,
            }
        };

        match &ctx.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(PoolError::Cancelled),
                result = bounded => result,
            },
            None => bounded.await,
        }
    }

    /// Give a healthy connection back for reuse
    pub async fn return_connection(&self, mut conn: Connection<F>) -> PoolResult<()> {
        let pooled = self.take_lease(&mut conn)?;
        self.inner.put_back(pooled).await;
        Ok(())
    }

    /// Report a connection as broken; it is destroyed, never reused
    pub async fn invalidate(&self, mut conn: Connection<F>) -> PoolResult<()> {
        let pooled = self.take_lease(&mut conn)?;
        self.inner.discard(pooled).await;
        Ok(())
    }

    /// Stop the evictor and destroy every idle connection.
    ///
    /// Borrowed connections stay usable; they are destroyed when they come
    /// back. Calling `close` again is a no-op; a concurrent second call
    /// returns only after the evictor has stopped.
    pub async fn close(&self) -> PoolResult<()> {
        {
            // held across the join so every caller observes a stopped evictor
            let mut evictor = self.inner.evictor.lock().await;
            if let Some(evictor) = evictor.take() {
                evictor.shutdown().await;
            }
        }

        let drained = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.inner.capacity_freed.notify_waiters();

        if !drained.is_empty() {
            debug!(count = drained.len(), address = self.inner.factory.address(), "closing idle connections");
        }
        for conn in drained {
            self.inner.destroy(conn).await;
        }
        Ok(())
    }

    /// Run one eviction sweep now instead of waiting for the evictor
    pub async fn evict(&self) -> EvictionReport {
        self.inner.run_eviction().await
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        let (active, idle) = {
            let state = self.inner.state.lock();
            (state.active, state.idle.len())
        };
        self.inner.metrics.get_metrics(active, idle, self.inner.config.max_active)
    }

    /// Get health status
    pub fn health(&self) -> HealthStatus {
        let state = self.inner.state.lock();
        HealthStatus::new(state.idle.len(), state.active, self.inner.config.max_active, state.closed)
    }

    fn take_lease(&self, lease: &mut Connection<F>) -> PoolResult<FactoryConnection<F>> {
        if !Arc::ptr_eq(&self.inner, &lease.pool) {
            return Err(PoolError::ForeignConnection);
        }
        lease.conn.take().ok_or(PoolError::ForeignConnection)
    }
}
