//! In-memory transport and factory shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use esox_connectionpool::{
    CancellationToken, ConnectionFactory, FactoryConnection, PoolError, PoolResult,
    PooledConnection, Transport, TransportError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub struct MockTransport {
    open: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Hands out numbered connections; the client half is the sequence number.
#[derive(Default)]
pub struct MockFactory {
    created: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail_create: AtomicBool,
    create_closed: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    flags: Mutex<Vec<Arc<AtomicBool>>>,
    validation_gate: Mutex<Option<CancellationToken>>,
    validation_started: Notify,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make `create` fail with a connection error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_create.store(unreachable, Ordering::SeqCst);
    }

    /// Make `create` hand out transports that already report closed
    pub fn set_create_closed(&self, closed: bool) {
        self.create_closed.store(closed, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    /// Park every `validate` call until the returned token is cancelled
    pub fn hold_validation(&self) -> CancellationToken {
        let gate = CancellationToken::new();
        *self.validation_gate.lock() = Some(gate.clone());
        gate
    }

    /// Resolves once a held `validate` call has started
    pub async fn validation_started(&self) {
        self.validation_started.notified().await;
    }

    /// Simulate the server dropping every connection opened so far
    pub fn break_all(&self) {
        for flag in self.flags.lock().iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Simulate the server dropping one connection
    pub fn break_connection(&self, sequence: usize) {
        self.flags.lock()[sequence].store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Transport = MockTransport;
    type Client = usize;

    fn address(&self) -> &str {
        "mock:9000"
    }

    async fn create(&self) -> PoolResult<FactoryConnection<Self>> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PoolError::Connection {
                address: self.address().to_string(),
                source: TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )),
            });
        }

        let flag = Arc::new(AtomicBool::new(false));
        let mut transport = MockTransport {
            open: Arc::clone(&flag),
            closes: Arc::clone(&self.closes),
        };
        transport.open().await.map_err(|source| PoolError::Connection {
            address: self.address().to_string(),
            source,
        })?;
        if self.create_closed.load(Ordering::SeqCst) {
            flag.store(false, Ordering::SeqCst);
        }

        let sequence = {
            let mut flags = self.flags.lock();
            flags.push(flag);
            flags.len() - 1
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection::new(transport, sequence))
    }

    async fn validate(&self, conn: &FactoryConnection<Self>) -> bool {
        let gate = self.validation_gate.lock().clone();
        if let Some(gate) = gate {
            self.validation_started.notify_one();
            gate.cancelled().await;
        }
        conn.transport().is_open()
    }
}
