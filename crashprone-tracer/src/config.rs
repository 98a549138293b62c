//! Engine tunables

use serde::{Deserialize, Serialize};

/// Errors from validating an [`EngineConfig`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("depth limit must be at least 1")]
    ZeroDepth,
}

/// Configuration for the slicing engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dynamic instructions retained per thread
    pub window_size: usize,
    /// Maximum BFS hops per provenance search
    pub depth_limit: u32,
    /// Report-time filter; does not affect what is recorded
    pub min_exec_count: u64,
}

impl EngineConfig {
    pub fn new(window_size: usize, depth_limit: u32, min_exec_count: u64) -> Self {
        Self {
            window_size,
            depth_limit,
            min_exec_count,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_depth_limit(mut self, depth_limit: u32) -> Self {
        self.depth_limit = depth_limit;
        self
    }

    pub fn with_min_exec_count(mut self, min_exec_count: u64) -> Self {
        self.min_exec_count = min_exec_count;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.depth_limit == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: 10_000,
            depth_limit: 5,
            min_exec_count: 2,
        }
    }
}
