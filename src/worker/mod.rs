//! Background execution of slow segment work

pub mod pool;

pub use pool::WorkerPool;
