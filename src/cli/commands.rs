//! CLI commands

use crate::archive::{RemoteConfig, S3Config};
use crate::config::{ServerConfig, SwitcherConfig};
use crate::error::{Error, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sqlite-tsdb CLI
#[derive(Parser, Debug)]
#[command(name = "sqlite-tsdb")]
#[command(about = "Event ingestion into rotating, searchable SQLite segments", version)]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ingestion server
    Start(StartArgs),
    /// Full-text search a segment file
    Search {
        /// Segment file to open
        #[arg(short, long)]
        file: PathBuf,
        /// FTS5 match expression
        #[arg(short, long)]
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("archive").required(true).args(["s3_bucket", "archive_dir"])))]
pub struct StartArgs {
    /// Port for the http server
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Existing directory where segments are written
    #[arg(long)]
    pub work_path: PathBuf,

    /// Events per segment before it is archived
    #[arg(long, default_value_t = 10_000)]
    pub flush_size: u64,

    /// Events held in memory before the oldest are dropped
    #[arg(long, default_value_t = 10_000)]
    pub buffer_size: usize,

    /// Threads closing and archiving retired segments
    #[arg(long, default_value_t = 1)]
    pub finalize_workers: usize,

    /// Retired segments allowed to wait for a finalize thread
    #[arg(long, default_value_t = 1)]
    pub finalize_queue: usize,

    #[command(flatten)]
    pub s3: S3Args,

    /// Archive into a local directory instead of S3
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
#[command(next_help_heading = "S3")]
pub struct S3Args {
    #[arg(long)]
    pub s3_access_key_id: Option<String>,

    #[arg(long)]
    pub s3_secret_access_key: Option<String>,

    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Custom endpoint for S3 compatible stores
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    #[arg(long)]
    pub s3_region: Option<String>,

    /// Key prefix for archived segments
    #[arg(long, default_value = "")]
    pub s3_path: String,

    #[arg(long)]
    pub s3_force_path_style: bool,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub s3_skip_verify: bool,
}

impl StartArgs {
    pub fn switcher_config(&self) -> SwitcherConfig {
        SwitcherConfig::new(&self.work_path)
            .with_flush_threshold(self.flush_size)
            .with_buffer_capacity(self.buffer_size)
            .with_finalize_workers(self.finalize_workers, self.finalize_queue)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::with_port(self.port)
    }

    pub fn remote_config(&self) -> Result<RemoteConfig> {
        if let Some(bucket) = &self.s3.s3_bucket {
            let s3 = S3Config {
                bucket: bucket.clone(),
                region: self.s3.s3_region.clone(),
                endpoint: self.s3.s3_endpoint.clone(),
                access_key_id: self.s3.s3_access_key_id.clone(),
                secret_access_key: self.s3.s3_secret_access_key.clone(),
                force_path_style: self.s3.s3_force_path_style,
                skip_verify: self.s3.s3_skip_verify,
            };
            return Ok(RemoteConfig::s3(s3, self.s3.s3_path.clone()));
        }

        match &self.archive_dir {
            Some(dir) => Ok(RemoteConfig::local(dir, self.s3.s3_path.clone())),
            None => Err(Error::Configuration(
                "either --s3-bucket or --archive-dir is required".to_string(),
            )),
        }
    }
}
