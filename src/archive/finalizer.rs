//! Finalizer: ships a closed segment file to durable remote storage

use crate::error::{Error, Result};
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::info;

/// Archives a segment that has already been closed and compacted.
///
/// Called once per retired segment from a worker thread. Errors are logged by
/// the caller and never retried.
#[cfg_attr(test, mockall::automock)]
pub trait Finalizer: Send + Sync {
    fn finalize(&self, path: &Path) -> Result<()>;
}

impl<F> Finalizer for F
where
    F: Fn(&Path) -> Result<()> + Send + Sync,
{
    fn finalize(&self, path: &Path) -> Result<()> {
        self(path)
    }
}

/// Copies segment files to an [`ObjectStore`] under `<prefix>/<file name>`.
///
/// Worker threads are not runtime threads, so the upload is driven with
/// [`Handle::block_on`] on the runtime the finalizer was built with.
pub struct ObjectStoreFinalizer {
    store: Arc<dyn ObjectStore>,
    prefix: ObjectPath,
    runtime: Handle,
}

impl ObjectStoreFinalizer {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: ObjectPath, runtime: Handle) -> Self {
        Self {
            store,
            prefix,
            runtime,
        }
    }

    /// Remote location for a local segment file
    pub fn remote_path(&self, local: &Path) -> Result<ObjectPath> {
        let name = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Archive(format!("{} has no file name", local.display())))?;
        Ok(self.prefix.child(name))
    }
}

impl Finalizer for ObjectStoreFinalizer {
    fn finalize(&self, path: &Path) -> Result<()> {
        let remote = self.remote_path(path)?;
        info!(local = %path.display(), remote = %remote, "starting transfer");

        let started = Instant::now();
        let contents = Bytes::from(std::fs::read(path)?);
        let size = contents.len();
        self.runtime
            .block_on(self.store.put(&remote, contents.into()))
            .map_err(|e| Error::Archive(format!("could not copy to {}: {}", remote, e)))?;

        info!(
            remote = %remote,
            bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished transfer"
        );
        Ok(())
    }
}
