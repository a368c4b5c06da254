//! Engine configuration, built once at startup and handed to every
//! component that needs paging or scheduling parameters.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each output page
    pub page_size: usize,
    /// Maximum queued elements per stream direction; `None` means unbounded
    pub stream_capacity: Option<usize>,
    /// Longest time an operator blocks in a pull before re-checking its
    /// stop flag
    pub poll_interval_ms: u64,
    /// Collect per-operator statistics during execution
    pub statistics_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 64,
            stream_capacity: None,
            poll_interval_ms: 10,
            statistics_enabled: false,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing keys keep their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_stream_capacity(mut self, capacity: Option<usize>) -> Self {
        self.stream_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }
}
