//! Remote storage configuration

use crate::error::{Error, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use std::path::PathBuf;
use std::sync::Arc;

/// S3 (or S3 compatible) bucket settings
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Address the bucket as `<endpoint>/<bucket>` instead of `<bucket>.<endpoint>`
    pub force_path_style: bool,
    /// Accept invalid TLS certificates
    pub skip_verify: bool,
}

/// Where finalized segments go
#[derive(Debug, Clone)]
pub enum RemoteTarget {
    S3(S3Config),
    /// A directory on a local or mounted filesystem
    Local(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub target: RemoteTarget,
    /// Key prefix placed in front of every archived file name
    pub prefix: String,
}

impl RemoteConfig {
    pub fn s3(config: S3Config, prefix: impl Into<String>) -> Self {
        Self {
            target: RemoteTarget::S3(config),
            prefix: prefix.into(),
        }
    }

    pub fn local(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            target: RemoteTarget::Local(root.into()),
            prefix: prefix.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.target {
            RemoteTarget::S3(s3) => {
                if s3.bucket.trim().is_empty() {
                    return Err(Error::Configuration("s3 bucket must not be empty".to_string()));
                }
                if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
                    return Err(Error::Configuration(
                        "s3 access key id and secret access key must be given together".to_string(),
                    ));
                }
            }
            RemoteTarget::Local(root) => {
                if root.as_os_str().is_empty() {
                    return Err(Error::Configuration(
                        "archive directory must not be empty".to_string(),
                    ));
                }
            }
        }
        self.prefix_path().map(|_| ())
    }

    /// The prefix as an object store path; surrounding slashes are ignored.
    pub fn prefix_path(&self) -> Result<ObjectPath> {
        let trimmed = self.prefix.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(ObjectPath::default());
        }
        ObjectPath::parse(trimmed).map_err(|e| {
            Error::Configuration(format!("invalid archive prefix {:?}: {}", self.prefix, e))
        })
    }

    /// Build the object store client
    pub fn build(&self) -> Result<Arc<dyn ObjectStore>> {
        self.validate()?;
        match &self.target {
            RemoteTarget::S3(s3) => {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(&s3.bucket)
                    .with_virtual_hosted_style_request(!s3.force_path_style)
                    .with_client_options(
                        ClientOptions::new().with_allow_invalid_certificates(s3.skip_verify),
                    );

                if let Some(region) = &s3.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &s3.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                if let (Some(key), Some(secret)) = (&s3.access_key_id, &s3.secret_access_key) {
                    builder = builder.with_access_key_id(key).with_secret_access_key(secret);
                }

                Ok(Arc::new(builder.build()?))
            }
            RemoteTarget::Local(root) => {
                std::fs::create_dir_all(root)?;
                Ok(Arc::new(LocalFileSystem::new_with_prefix(root)?))
            }
        }
    }
}
