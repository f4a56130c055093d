//! Runtime configuration

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Settings for the ingestion pipeline
#[derive(Debug, Clone)]
pub struct SwitcherConfig {
    /// Existing directory where active segments are written
    pub work_dir: PathBuf,
    /// Events per segment before rotating
    pub flush_threshold: u64,
    /// Capacity of the lossy ingestion queue
    pub buffer_capacity: usize,
    /// Retired segments allowed to wait for a finalize worker
    pub finalize_queue_depth: usize,
    pub finalize_workers: usize,
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            flush_threshold: 10_000,
            buffer_capacity: 10_000,
            finalize_queue_depth: 1,
            finalize_workers: 1,
        }
    }
}

impl SwitcherConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_flush_threshold(mut self, flush_threshold: u64) -> Self {
        self.flush_threshold = flush_threshold;
        self
    }

    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    pub fn with_finalize_workers(mut self, workers: usize, queue_depth: usize) -> Self {
        self.finalize_workers = workers;
        self.finalize_queue_depth = queue_depth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.work_dir.is_dir() {
            return Err(Error::Configuration(format!(
                "work path {} is not an existing directory",
                self.work_dir.display()
            )));
        }
        if self.flush_threshold == 0 {
            return Err(Error::Configuration("flush size must be greater than zero".to_string()));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Configuration("buffer size must be greater than zero".to_string()));
        }
        if self.finalize_workers == 0 {
            return Err(Error::Configuration(
                "finalize workers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    /// Listen on every interface at `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_port(8080)
    }
}
