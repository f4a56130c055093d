//! Core data types

pub mod event;
pub mod temporal;

pub use event::*;
pub use temporal::*;
