//! Supervisor configuration.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("min_workers must be at least 1")]
    ZeroMinWorkers,

    #[error("max_workers ({max}) must be >= min_workers ({min})")]
    MaxBelowMin { min: usize, max: usize },

    #[error("concurrency_limit must be at least 1")]
    ZeroConcurrency,

    #[error("control_loop_interval must be non-zero")]
    ZeroTickInterval,
}

/// Configuration for the supervisor and its workers.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Minimum number of workers to keep alive.
    pub min_workers: usize,
    /// Hard ceiling on the worker population.
    pub max_workers: usize,
    /// Pending-queue depth that triggers scale-up.
    pub scale_up_threshold: usize,
    /// Maximum simultaneously in-flight tasks per worker.
    pub concurrency_limit: usize,
    /// Interval between control-loop ticks.
    pub control_loop_interval: Duration,
    /// How long an idle worker sleeps between queue polls.
    pub idle_backoff: Duration,
    /// Maximum time allowed for a single task execution.
    pub task_timeout: Duration,
    /// Grace period for in-flight tasks when a worker is stopped.
    pub shutdown_grace: Duration,
    /// Consecutive fully-idle ticks before retiring a worker.
    pub scale_down_idle_ticks: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 4,
            scale_up_threshold: 10,
            concurrency_limit: 3,
            control_loop_interval: Duration::from_millis(500),
            idle_backoff: Duration::from_millis(100),
            task_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            scale_down_idle_ticks: 10,
        }
    }
}

impl SupervisorConfig {
    /// Creates a configuration with the given worker bounds.
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            ..Default::default()
        }
    }

    /// Sets the scale-up threshold.
    pub fn with_scale_up_threshold(mut self, threshold: usize) -> Self {
        self.scale_up_threshold = threshold;
        self
    }

    /// Sets the per-worker concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Sets the control-loop tick interval.
    pub fn with_control_loop_interval(mut self, interval: Duration) -> Self {
        self.control_loop_interval = interval;
        self
    }

    /// Sets the idle backoff interval.
    pub fn with_idle_backoff(mut self, interval: Duration) -> Self {
        self.idle_backoff = interval;
        self
    }

    /// Sets the per-task execution timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets how many idle ticks precede a scale-down.
    pub fn with_scale_down_idle_ticks(mut self, ticks: u32) -> Self {
        self.scale_down_idle_ticks = ticks;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers == 0 {
            return Err(ConfigError::ZeroMinWorkers);
        }
        if self.max_workers < self.min_workers {
            return Err(ConfigError::MaxBelowMin {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.control_loop_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }
}
