//! sqlite-tsdb: event ingestion into rotating SQLite segments
//!
//! Events arrive over HTTP, pass through a bounded lossy queue and are written
//! by a single consumer thread into the active SQLite segment, where a trigger
//! keeps an FTS5 index current. Every `flush_threshold` events the segment is
//! retired: a worker compacts it and ships it to remote object storage.
//!
//! # Core Concepts
//!
//! - **Events**: labels, a nanosecond timestamp and a text value
//! - **Segments**: self-contained, searchable SQLite files
//! - **Switcher**: owns the active segment and rotates it
//! - **Finalizer**: archives retired segments
//!
//! # Example
//!
//! ```no_run
//! use sqlite_tsdb::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn example() -> sqlite_tsdb::error::Result<()> {
//! let finalizer = |path: &Path| -> Result<()> {
//!     println!("archiving {}", path.display());
//!     Ok(())
//! };
//! let switcher = Switcher::new(
//!     SwitcherConfig::new("/var/lib/tsdb").with_flush_threshold(1_000),
//!     Arc::new(finalizer),
//! )?;
//!
//! switcher.insert(Event::new(Timestamp::now(), "disk almost full").with_label("host", "db-1"));
//! switcher.close()?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod archive;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod worker;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::archive::{Finalizer, ObjectStoreFinalizer, RemoteConfig};
    pub use crate::config::{ServerConfig, SwitcherConfig};
    pub use crate::core::*;
    pub use crate::error::{Error, Result};
    pub use crate::storage::*;
}
