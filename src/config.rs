use std::sync::Arc;
use std::time::Duration;

use crate::net::traits::{Logger, NoOpLogger};

/// Configuration for a reactor cluster.
///
/// Controls the number of reactor threads, timer granularity, queue and
/// buffer sizing, connection limits, and socket options. Use
/// `ClusterConfig::builder()` for ergonomic construction.
///
/// ## Sizing
///
/// - `reactors`: event-loop threads; the default matches the core count
/// - `task_queue_capacity`: cross-thread submissions a reactor can have
///   outstanding; overflow is fatal for that reactor, so size generously
/// - `timer_slots`: timer wheel buckets (rounded up to a power of two)
///
/// ## Socket Options
///
/// - `no_delay`: when enabled (default), disables Nagle's algorithm
#[derive(Clone)]
pub struct ClusterConfig {
    /// Number of reactor threads
    pub reactors: usize,
    /// Ticker interval; also the timer wheel's tick duration
    pub tick_interval: Duration,
    /// Timer wheel bucket count
    pub timer_slots: usize,
    /// Capacity of each reactor's cross-thread task queue
    pub task_queue_capacity: usize,
    /// Size of the per-reactor scratch read buffer
    pub read_buffer_size: usize,
    /// Enable TCP_NODELAY on accepted and connected sockets
    pub no_delay: bool,
    /// Maximum number of connections across the cluster
    pub max_connections: Option<usize>,
    /// Logger for reactor events
    pub logger: Arc<dyn Logger>,
}

impl ClusterConfig {
    /// Create a new builder for ClusterConfig
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::new()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            reactors: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            tick_interval: Duration::from_millis(100),
            timer_slots: 1024,
            task_queue_capacity: 64 * 1024,
            read_buffer_size: 64 * 1024,
            no_delay: true,
            max_connections: None,
            logger: Arc::new(NoOpLogger),
        }
    }
}

/// Builder for ClusterConfig using the builder pattern.
///
/// All fields are optional and will use defaults from ClusterConfig::default()
/// if not explicitly set.
pub struct ClusterConfigBuilder {
    reactors: Option<usize>,
    tick_interval: Option<Duration>,
    timer_slots: Option<usize>,
    task_queue_capacity: Option<usize>,
    read_buffer_size: Option<usize>,
    no_delay: Option<bool>,
    max_connections: Option<usize>,
    logger: Option<Arc<dyn Logger>>,
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Self {
            reactors: None,
            tick_interval: None,
            timer_slots: None,
            task_queue_capacity: None,
            read_buffer_size: None,
            no_delay: None,
            max_connections: None,
            logger: None,
        }
    }

    /// Set the number of reactor threads
    pub fn reactors(mut self, count: usize) -> Self {
        self.reactors = Some(count);
        self
    }

    /// Set the ticker interval (timer tick duration)
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Set the timer wheel bucket count
    pub fn timer_slots(mut self, slots: usize) -> Self {
        self.timer_slots = Some(slots);
        self
    }

    /// Set the per-reactor task queue capacity
    pub fn task_queue_capacity(mut self, capacity: usize) -> Self {
        self.task_queue_capacity = Some(capacity);
        self
    }

    /// Set the scratch read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = Some(size);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set the logger implementation
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the ClusterConfig
    pub fn build(self) -> ClusterConfig {
        let default = ClusterConfig::default();
        ClusterConfig {
            reactors: self.reactors.unwrap_or(default.reactors).max(1),
            tick_interval: self.tick_interval.unwrap_or(default.tick_interval),
            timer_slots: self.timer_slots.unwrap_or(default.timer_slots),
            task_queue_capacity: self
                .task_queue_capacity
                .unwrap_or(default.task_queue_capacity),
            read_buffer_size: self.read_buffer_size.unwrap_or(default.read_buffer_size).max(1),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            max_connections: self.max_connections.or(default.max_connections),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = ClusterConfig::builder()
            .reactors(2)
            .tick_interval(Duration::from_millis(10))
            .task_queue_capacity(128)
            .max_connections(100)
            .no_delay(false)
            .build();
        assert_eq!(config.reactors, 2);
        assert_eq!(config.tick_interval, Duration::from_millis(10));
        assert_eq!(config.task_queue_capacity, 128);
        assert_eq!(config.max_connections, Some(100));
        assert!(!config.no_delay);
    }

    #[test]
    fn test_zero_reactors_clamped() {
        let config = ClusterConfig::builder().reactors(0).build();
        assert_eq!(config.reactors, 1);
    }
}
