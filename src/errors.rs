use std::error::Error as StdError;
use thiserror::Error;

/// Error type returned by a [`Job`](crate::job::Job) body.
pub type JobError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a submission was refused. The pool itself is left untouched.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SubmitError {
    #[error("dispatch pool is stopped")]
    Stopped,
    #[error("dispatch queue is full ({capacity} items pending)")]
    QueueFull { capacity: usize },
}

/// Failure of a single work item, caught at the worker boundary.
#[derive(Debug, Error)]
pub enum WorkExecutionError {
    #[error("job failed: {0}")]
    Failed(#[source] JobError),
    #[error("job panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("worker count must be positive")]
    ZeroWorkers,
    #[error("queue capacity must be positive when set")]
    ZeroCapacity,
    #[error("invalid value {value:?} for {var}")]
    InvalidVar { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink is closed")]
    Closed,
    #[error("failed to deliver {event}: {reason}")]
    Delivery { event: String, reason: String },
}
