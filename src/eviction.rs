//! Idle connection eviction

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::factory::ConnectionFactory;
use crate::metrics::MetricsTracker;
use crate::pool::PoolInner;

use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Rules an eviction sweep applies to idle connections
///
/// # Examples
///
/// ```
/// use esox_connectionpool::{EvictionPolicy, PoolConfig};
/// use std::time::Duration;
///
/// let config = PoolConfig::new("127.0.0.1:9000")
///     .with_idle_timeout(Duration::from_secs(60))
///     .with_test_while_idle(false);
///
/// let policy = EvictionPolicy::from_config(&config);
/// assert_eq!(policy.idle_timeout, Duration::from_secs(60));
/// assert!(!policy.test_while_idle);
/// ```
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    /// Idle connections unused for longer than this are destroyed
    pub idle_timeout: Duration,

    /// Validate the remaining idle connections
    pub test_while_idle: bool,

    /// Validate at most this many connections per sweep, oldest first
    pub max_tests_per_run: Option<usize>,
}

impl EvictionPolicy {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            test_while_idle: config.test_while_idle,
            max_tests_per_run: config.num_tests_per_eviction_run,
        }
    }

    pub fn is_expired<T, C>(&self, conn: &PooledConnection<T, C>, now: Instant) -> bool {
        conn.idle_for(now) > self.idle_timeout
    }
}

/// Outcome of one eviction sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Destroyed for exceeding the idle timeout
    pub expired: usize,

    /// Destroyed for failing validation
    pub invalid: usize,

    /// Destroyed because idle capacity filled up while they were validated
    pub overflow: usize,

    /// Idle connections left after the sweep
    pub retained: usize,
}

impl EvictionReport {
    pub fn destroyed(&self) -> usize {
        self.expired + self.invalid + self.overflow
    }
}

/// Handle to the background eviction task
pub(crate) struct Evictor {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Evictor {
    pub fn spawn<F: ConnectionFactory>(
        runtime: &Handle,
        pool: Weak<PoolInner<F>>,
        interval: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        let report = pool.run_eviction().await;
                        if report.destroyed() > 0 {
                            debug!(
                                expired = report.expired,
                                invalid = report.invalid,
                                overflow = report.overflow,
                                retained = report.retained,
                                "eviction sweep"
                            );
                        }
                    }
                }
            }
            trace!("evictor stopped");
        });

        Self { shutdown, task }
    }

    /// Signal the task without waiting for it
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Signal the task and wait until it has exited
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("evictor task panicked: {}", e);
            }
        }
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// One sweep over the idle set.
    ///
    /// Expiry is decided under the lock. Validation and destroy calls run
    /// outside it; connections under validation are out of the idle set and
    /// survivors go back underneath anything returned meanwhile.
    pub(crate) async fn run_eviction(&self) -> EvictionReport {
        let now = Instant::now();
        let mut report = EvictionReport::default();

        let (expired, candidates) = {
            let mut state = self.state.lock();
            if state.closed {
                return report;
            }

            let (expired, mut kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|conn| self.eviction.is_expired(conn, now));

            // bottom of the stack holds the connections idle the longest
            let candidates: Vec<_> = if self.eviction.test_while_idle {
                let count = self.eviction.max_tests_per_run.unwrap_or(kept.len()).min(kept.len());
                kept.drain(..count).collect()
            } else {
                Vec::new()
            };

            state.idle = kept;
            (expired, candidates)
        };

        report.expired = expired.len();
        for conn in expired {
            trace!(connection = conn.id(), "evicting expired idle connection");
            self.destroy(conn).await;
        }

        if !candidates.is_empty() {
            let mut survivors = Vec::with_capacity(candidates.len());
            let mut invalid = Vec::new();
            for mut conn in candidates {
                if self.factory.validate(&conn).await {
                    conn.mark_validated();
                    survivors.push(conn);
                } else {
                    invalid.push(conn);
                }
            }

            let overflow = {
                let mut state = self.state.lock();
                if state.closed {
                    survivors
                } else {
                    survivors.append(&mut state.idle);
                    state.idle = survivors;
                    let excess = state.idle.len().saturating_sub(self.config.max_idle);
                    state.idle.drain(..excess).collect()
                }
            };

            report.invalid = invalid.len();
            report.overflow = overflow.len();
            MetricsTracker::add(&self.metrics.validation_failures, invalid.len() as u64);
            for conn in invalid.into_iter().chain(overflow) {
                trace!(connection = conn.id(), "evicting idle connection");
                self.destroy(conn).await;
            }
        }

        MetricsTracker::add(&self.metrics.evicted, report.destroyed() as u64);
        report.retained = self.state.lock().idle.len();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_policy_expiry() {
        let config = PoolConfig::new("localhost:9000").with_idle_timeout(Duration::from_secs(10));
        let policy = EvictionPolicy::from_config(&config);
        let conn = PooledConnection::new((), ());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!policy.is_expired(&conn, Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(policy.is_expired(&conn, Instant::now()));
    }

    #[test]
    fn test_report_totals() {
        let report = EvictionReport {
            expired: 2,
            invalid: 1,
            overflow: 1,
            retained: 3,
        };
        assert_eq!(report.destroyed(), 4);
    }
}
