//! Command line interface

pub mod commands;

pub use commands::{Cli, Commands, LogFormat, S3Args, StartArgs};
