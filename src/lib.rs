//! taskforge: adaptive process supervisor with a shared task queue.
//!
//! This library provides a supervisor that maintains a self-healing pool
//! of worker processes draining a shared FIFO queue of opaque tasks,
//! scaling the pool between configured bounds based on queue depth.

// Core modules
pub mod cli;
pub mod config;
pub mod handler;
pub mod metrics;
pub mod queue;
pub mod supervisor;
pub mod task;
pub mod worker;

// Re-export the primary public surface
pub use config::{ConfigError, SupervisorConfig};
pub use handler::TaskHandler;
pub use metrics::Metrics;
pub use supervisor::{Supervisor, SupervisorError};
pub use task::{PollReply, Task, TaskResult, TaskStatus};
