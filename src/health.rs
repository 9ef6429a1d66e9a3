//! Health monitoring for connection pools

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use esox_connectionpool::HealthStatus;
///
/// let health = HealthStatus::new(3, 1, 10, false);
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_connections, 3);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Active connections over `max_active` (0.0 to 1.0)
    pub utilization: f64,

    /// Idle connections ready for reuse
    pub idle_connections: usize,

    /// Borrowed connections
    pub active_connections: usize,

    /// Configured `max_active`
    pub max_active: usize,

    /// Whether `close` has been called
    pub closed: bool,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(idle: usize, active: usize, max_active: usize, closed: bool) -> Self {
        let utilization = if max_active > 0 {
            active as f64 / max_active as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = !closed;

        if closed {
            warnings.push("Pool is closed".to_string());
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if idle == 0 && active == max_active && !closed {
            warnings.push("Pool is exhausted".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_connections: idle,
            active_connections: active,
            max_active,
            closed,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_pool_is_unhealthy() {
        let health = HealthStatus::new(0, 4, 4, false);
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
    }

    #[test]
    fn test_closed_pool_is_unhealthy() {
        let health = HealthStatus::new(0, 0, 4, true);
        assert!(!health.is_healthy());
        assert_eq!(health.warnings, vec!["Pool is closed".to_string()]);
    }
}
