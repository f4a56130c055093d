//! Archival of finalized segments

pub mod finalizer;
pub mod remote;

pub use finalizer::{Finalizer, ObjectStoreFinalizer};
pub use remote::{RemoteConfig, RemoteTarget, S3Config};

#[cfg(test)]
pub use finalizer::MockFinalizer;
