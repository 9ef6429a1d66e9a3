//! The unit of pooling: a transport paired with its RPC client

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A transport and the RPC client bound to it, plus lifecycle timestamps.
///
/// The pool owns a `PooledConnection` while it is idle. While borrowed it is
/// owned by the caller through a [`Connection`](crate::Connection) lease.
#[derive(Debug)]
pub struct PooledConnection<T, C> {
    id: u64,
    transport: T,
    client: C,
    created_at: Instant,
    last_validated: Instant,
    last_used: Instant,
}

impl<T, C> PooledConnection<T, C> {
    /// Wrap an already opened transport and its client
    pub fn new(transport: T, client: C) -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            client,
            created_at: now,
            last_validated: now,
            last_used: now,
        }
    }

    /// Process-unique identifier, used in log output
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_validated(&self) -> Instant {
        self.last_validated
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// How long the connection has gone unused as of `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Split into transport and client
    pub fn into_parts(self) -> (T, C) {
        (self.transport, self.client)
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn mark_validated(&mut self) {
        self.last_validated = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = PooledConnection::new((), ());
        let b = PooledConnection::new((), ());
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_time() {
        let mut conn = PooledConnection::new((), 7u32);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(conn.idle_for(Instant::now()), Duration::from_secs(10));

        conn.touch();
        assert_eq!(conn.idle_for(Instant::now()), Duration::ZERO);
        assert_eq!(*conn.client(), 7);
        assert!(conn.created_at() < conn.last_used());
    }
}
