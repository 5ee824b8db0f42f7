use std::{fmt, str::FromStr};

use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetrics {
    pub workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub rejected_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / self.workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }

    /// Items accepted but not yet finished, as of the snapshot.
    pub fn outstanding(&self) -> usize {
        self.total_submitted
            .saturating_sub(self.completed_tasks + self.failed_tasks)
    }
}

/// Pool lifecycle. Moves forward only: `Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Lifecycle {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl Lifecycle {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Lifecycle::Running,
            1 => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }
}

/// What `submit` does when a bounded queue has no room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Wait for a worker to make room.
    #[default]
    Block,
    /// Fail fast with [`SubmitError::QueueFull`](crate::errors::SubmitError::QueueFull).
    Reject,
}

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Overflow::Block => f.write_str("block"),
            Overflow::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for Overflow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Overflow::Block),
            "reject" => Ok(Overflow::Reject),
            _ => Err(ConfigError::InvalidVar {
                var: "DISPATCH_OVERFLOW",
                value: s.to_owned(),
            }),
        }
    }
}
