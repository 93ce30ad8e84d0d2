//! Task queue, result store and the supervisor/worker wire protocol.
//!
//! The queue is a supervisor-owned FIFO; worker processes never map it
//! into their own address space. Instead each worker talks to the
//! supervisor over newline-delimited JSON on its stdin/stdout pipes, and
//! the supervisor answers every dequeue from the one shared queue, which
//! is what preserves FIFO across the whole pool.
//!
//! ```text
//!                 ┌────────────┐
//!                 │ Submitters │
//!                 └─────┬──────┘
//!                       │ submit
//!                 ┌─────▼──────┐
//!                 │ TaskQueue  │  (supervisor-owned FIFO)
//!                 └─────┬──────┘
//!                       │ QueueService::dispatch
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   worker-0 pipe  worker-1 pipe  worker-N pipe
//! ```

pub mod memory;
pub mod protocol;
pub mod service;

pub use memory::{QueueError, TaskQueue};
pub use protocol::{ProtocolError, SupervisorReply, WorkerRequest};
pub use service::QueueService;
