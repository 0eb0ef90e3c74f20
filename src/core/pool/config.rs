//! Work pool configuration.

use std::time::Duration;

/// Tunable parameters for the pool and its scheduler.
///
/// All defaults follow the published configuration: the pool starts at CPU
/// width, may grow to `max(128, CPU * 16)`, and rescales by 25% steps every
/// scale interval based on queue utilization.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker count at startup.
    pub initial_size: usize,
    /// Lower bound for scale-down.
    pub min_size: usize,
    /// Upper bound for scale-up.
    pub max_size: usize,
    /// Queue utilization above which the pool grows.
    pub scale_up_threshold: f64,
    /// Queue utilization below which the pool shrinks.
    pub scale_down_threshold: f64,
    /// Interval between scaling decisions.
    pub scale_interval: Duration,
    /// How long an idle pool lingers before the run winds it down.
    pub idle_timeout: Duration,
    /// Capacity of each priority lane.
    pub priority_queue_capacity: usize,
    /// How long a submit may wait for lane space before spilling over.
    pub enqueue_timeout: Duration,
    /// Poll interval while waiting for lane space.
    pub enqueue_retry_interval: Duration,
    /// Capacity of the direct-submission spillover queue.
    pub backpressure_queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        let max_size = 128.max(cpus * 16);
        Self {
            initial_size: cpus,
            min_size: 2,
            max_size,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            scale_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            priority_queue_capacity: max_size * 8,
            enqueue_timeout: Duration::from_millis(200),
            enqueue_retry_interval: Duration::from_millis(2),
            backpressure_queue_capacity: max_size * 16,
        }
    }
}

impl PoolConfig {
    /// Derive a configuration from the run's concurrency settings.
    pub fn from_concurrency(concurrency: &crate::config::ConcurrencyConfig) -> Self {
        let mut config = Self::default();
        if concurrency.conversion_workers > 0 {
            config.initial_size = concurrency.conversion_workers;
            config.max_size = config.max_size.max(config.initial_size);
        }
        config
    }

    /// Grow by 25%, capped at the maximum.
    pub fn grown(&self, current: usize) -> usize {
        ((current as f64 * 1.25).ceil() as usize).min(self.max_size)
    }

    /// Shrink by 25%, floored at the minimum.
    pub fn shrunk(&self, current: usize) -> usize {
        ((current as f64 * 0.75).floor() as usize).max(self.min_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_published_values() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size, 2);
        assert!(config.max_size >= 128);
        assert_eq!(config.priority_queue_capacity, config.max_size * 8);
        assert_eq!(config.backpressure_queue_capacity, config.max_size * 16);
        assert_eq!(config.enqueue_timeout, Duration::from_millis(200));
        assert_eq!(config.scale_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_scaling_steps() {
        let config = PoolConfig {
            min_size: 2,
            max_size: 16,
            ..PoolConfig::default()
        };
        assert_eq!(config.grown(8), 10);
        assert_eq!(config.grown(15), 16);
        assert_eq!(config.shrunk(8), 6);
        assert_eq!(config.shrunk(2), 2);
    }

    #[test]
    fn test_from_concurrency_overrides_initial() {
        let concurrency = crate::config::ConcurrencyConfig {
            conversion_workers: 6,
            memory_limit_mb: 1024,
        };
        let config = PoolConfig::from_concurrency(&concurrency);
        assert_eq!(config.initial_size, 6);
    }
}
