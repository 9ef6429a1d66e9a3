//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a pool's counters and gauges
///
/// # Examples
///
/// ```
/// use esox_connectionpool::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// assert_eq!(metrics.export()["connections_created"], "0");
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Connections opened by the factory
    pub connections_created: u64,

    /// Connections closed for any reason
    pub connections_destroyed: u64,

    /// Successful borrows
    pub total_borrowed: u64,

    /// Connections given back with `return_connection`
    pub total_returned: u64,

    /// Connections reported broken with `invalidate`
    pub total_invalidated: u64,

    /// Failed liveness checks (borrow, create, return or idle)
    pub validation_failures: u64,

    /// Idle connections removed by eviction sweeps
    pub evicted: u64,

    /// Borrows rejected because the pool was at capacity
    pub exhausted_events: u64,

    /// Borrows that hit their deadline
    pub timeouts: u64,

    /// Current borrowed connections
    pub active_connections: usize,

    /// Current idle connections
    pub idle_connections: usize,

    /// Configured `max_active`
    pub max_active: usize,

    /// Active connections over `max_active` (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("connections_created".to_string(), self.connections_created.to_string());
        metrics.insert("connections_destroyed".to_string(), self.connections_destroyed.to_string());
        metrics.insert("total_borrowed".to_string(), self.total_borrowed.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("total_invalidated".to_string(), self.total_invalidated.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("evicted".to_string(), self.evicted.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("active_connections".to_string(), self.active_connections.to_string());
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("max_active".to_string(), self.max_active.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Render metrics in the Prometheus text exposition format.
    ///
    /// Every series carries a `pool` label plus any extra `tags`.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connectionpool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "user".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&PoolMetrics::default(), "rpc", Some(&tags)).unwrap();
    /// assert!(output.contains("connpool_connections_active"));
    /// assert!(output.contains("service=\"user\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let gauges = [
            ("connpool_connections_active", "Current borrowed connections", metrics.active_connections),
            ("connpool_connections_idle", "Current idle connections", metrics.idle_connections),
            ("connpool_connections_max_active", "Configured maximum active connections", metrics.max_active),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("connpool_utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("connpool_connections_created_total", "Connections opened", metrics.connections_created),
            ("connpool_connections_destroyed_total", "Connections closed", metrics.connections_destroyed),
            ("connpool_borrowed_total", "Successful borrows", metrics.total_borrowed),
            ("connpool_returned_total", "Connections returned", metrics.total_returned),
            ("connpool_invalidated_total", "Connections invalidated", metrics.total_invalidated),
            ("connpool_validation_failures_total", "Failed liveness checks", metrics.validation_failures),
            ("connpool_evicted_total", "Idle connections evicted", metrics.evicted),
            ("connpool_exhausted_total", "Borrows rejected at capacity", metrics.exhausted_events),
            ("connpool_timeouts_total", "Borrows that timed out", metrics.timeouts),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub connections_created: AtomicU64,
    pub connections_destroyed: AtomicU64,
    pub total_borrowed: AtomicU64,
    pub total_returned: AtomicU64,
    pub total_invalidated: AtomicU64,
    pub validation_failures: AtomicU64,
    pub evicted: AtomicU64,
    pub exhausted_events: AtomicU64,
    pub timeouts: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, active: usize, idle: usize, max_active: usize) -> PoolMetrics {
        let utilization = if max_active > 0 {
            active as f64 / max_active as f64
        } else {
            0.0
        };

        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            total_borrowed: self.total_borrowed.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            total_invalidated: self.total_invalidated.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            active_connections: active,
            idle_connections: idle,
            max_active,
            utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_utilization() {
        let tracker = MetricsTracker::new();
        MetricsTracker::incr(&tracker.total_borrowed);
        MetricsTracker::add(&tracker.evicted, 3);

        let metrics = tracker.get_metrics(5, 2, 10);
        assert_eq!(metrics.total_borrowed, 1);
        assert_eq!(metrics.evicted, 3);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.export()["utilization"], "0.50");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsTracker::new().get_metrics(1, 4, 8);
        let output = MetricsExporter::export_prometheus(&metrics, "users", None).unwrap();

        assert!(output.contains("# TYPE connpool_connections_idle gauge"));
        assert!(output.contains("connpool_connections_idle{pool=\"users\"} 4"));
        assert!(output.contains("connpool_borrowed_total{pool=\"users\"} 0"));
    }
}
