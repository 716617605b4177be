//! Projector tuning.

use std::time::Duration;

use crate::{ProjectionError, Result};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_PERSIST_BLOCK_SIZE: usize = 1000;
pub const DEFAULT_SLEEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectorOptions {
    /// How long a lease lasts after being taken or renewed.
    pub lock_timeout: Duration,
    /// Number of dispatched events between two checkpoints; at least 1.
    pub persist_block_size: usize,
    /// Pause after a pass that dispatched nothing.
    pub sleep: Duration,
}

impl ProjectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn persist_block_size(mut self, persist_block_size: usize) -> Self {
        self.persist_block_size = persist_block_size;
        self
    }

    pub fn sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.persist_block_size < 1 {
            return Err(ProjectionError::InvalidArgument(
                "persist_block_size must be at least 1".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(ProjectionError::InvalidArgument(
                "lock_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ProjectorOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            persist_block_size: DEFAULT_PERSIST_BLOCK_SIZE,
            sleep: DEFAULT_SLEEP,
        }
    }
}
