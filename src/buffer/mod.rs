//! In-memory buffering between request handlers and the segment writer

pub mod lossy;

pub use lossy::LossyQueue;
