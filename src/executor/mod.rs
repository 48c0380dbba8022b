//! Concurrent execution of independent work items.

pub mod pool;

pub use pool::{PoolReport, TaskPool};
