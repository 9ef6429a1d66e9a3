//! Connection factories: create, validate and destroy pooled connections

use crate::config::TransportConfig;
use crate::connection::PooledConnection;
use crate::errors::{PoolError, PoolResult};
use crate::transport::{TcpTransport, Transport};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Creates connections to one fixed endpoint and decides whether they are
/// still usable.
///
/// Only [`create`](ConnectionFactory::create) must be implemented. The
/// defaults validate by asking the transport whether it is open, destroy by
/// closing it, and treat activation/passivation as no-ops.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Transport: Transport;
    type Client: Send + Sync + 'static;

    /// Endpoint this factory connects to
    fn address(&self) -> &str;

    /// Open a new transport and bind a client to it
    async fn create(&self) -> PoolResult<PooledConnection<Self::Transport, Self::Client>>;

    /// Liveness probe. Must not fail; returns `false` on any doubt.
    async fn validate(&self, conn: &PooledConnection<Self::Transport, Self::Client>) -> bool {
        conn.transport().is_open()
    }

    /// Close the transport. Errors are logged and swallowed.
    async fn destroy(&self, mut conn: PooledConnection<Self::Transport, Self::Client>) {
        let id = conn.id();
        if let Err(e) = conn.transport_mut().close().await {
            warn!(connection = id, address = self.address(), "failed to close transport: {}", e);
        }
    }

    /// Called before an idle connection is handed to a borrower
    async fn activate(
        &self,
        _conn: &mut PooledConnection<Self::Transport, Self::Client>,
    ) -> PoolResult<()> {
        Ok(())
    }

    /// Called before a returned connection goes back to the idle set
    async fn passivate(
        &self,
        _conn: &mut PooledConnection<Self::Transport, Self::Client>,
    ) -> PoolResult<()> {
        Ok(())
    }
}

/// Factory opening [`TcpTransport`]s to a fixed address.
///
/// The client half of each connection is built by a closure, so generated
/// RPC stubs can be bound without the pool knowing their type.
///
/// # Examples
///
/// ```
/// use esox_connectionpool::{ConnectionFactory, TcpConnectionFactory, TransportConfig};
///
/// let factory = TcpConnectionFactory::new(TransportConfig::new("127.0.0.1:9000"));
/// assert_eq!(factory.address(), "127.0.0.1:9000");
/// ```
pub struct TcpConnectionFactory<C = ()> {
    config: Arc<TransportConfig>,
    client_builder: Arc<dyn Fn(&TcpTransport) -> C + Send + Sync>,
}

impl TcpConnectionFactory<()> {
    /// Factory whose connections carry no client handle
    pub fn new(config: TransportConfig) -> Self {
        Self::with_client(config, |_| ())
    }
}

impl<C: Send + Sync + 'static> TcpConnectionFactory<C> {
    /// Factory that binds a client to every opened transport
    pub fn with_client<B>(config: TransportConfig, builder: B) -> Self
    where
        B: Fn(&TcpTransport) -> C + Send + Sync + 'static,
    {
        Self {
            config: Arc::new(config),
            client_builder: Arc::new(builder),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> ConnectionFactory for TcpConnectionFactory<C> {
    type Transport = TcpTransport;
    type Client = C;

    fn address(&self) -> &str {
        &self.config.address
    }

    async fn create(&self) -> PoolResult<PooledConnection<TcpTransport, C>> {
        let mut transport = TcpTransport::new(Arc::clone(&self.config));
        transport
            .open()
            .await
            .map_err(|source| PoolError::Connection {
                address: self.config.address.clone(),
                source,
            })?;

        let client = (self.client_builder)(&transport);
        let conn = PooledConnection::new(transport, client);
        debug!(connection = conn.id(), address = %self.config.address, "opened transport");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_create_validate_destroy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let factory = TcpConnectionFactory::with_client(TransportConfig::new(address), |t| {
            t.address().to_string()
        });

        let conn = factory.create().await.unwrap();
        assert_eq!(conn.client(), factory.address());
        assert!(factory.validate(&conn).await);

        factory.destroy(conn).await;
    }

    #[tokio::test]
    async fn test_create_wraps_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let factory = TcpConnectionFactory::new(TransportConfig::new(address.clone()));
        match factory.create().await {
            Err(PoolError::Connection { address: failed, .. }) => assert_eq!(failed, address),
            other => panic!("expected connection error, got {:?}", other.map(|c| c.id())),
        }
    }
}
