//! HTTP API

pub mod rest;

pub use rest::{route, serve, AppState};
