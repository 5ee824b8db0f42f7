//! Background dispatcher for side-effect work in a web process.
//!
//! # Features
//! - Fixed-size pool of worker threads sharing one FIFO queue
//! - Fire-and-forget submission from any thread
//! - Failure isolation: errors and panics are logged, never propagated
//! - `drain` barrier and graceful, wake-on-stop shutdown
//! - Optional bounded queue with block or reject backpressure
//! - Live-update broadcast jobs for the task board

pub mod broadcast;
pub mod config;
pub mod errors;
pub mod job;
pub mod model;
pub mod pool;
pub mod queue;

pub use config::Config;
pub use errors::{JobError, SubmitError, WorkExecutionError};
pub use job::Job;
pub use model::{Lifecycle, Overflow, PoolMetrics};
pub use pool::DispatchPool;
