//! Isolated analysis workers: the coordinator-side pool and the loop that
//! runs inside each worker process.

pub mod pool;
pub mod process;
pub mod protocol;
pub mod sizing;

pub use pool::{PoolError, PoolSettings, PoolStatus, WorkerCommand, WorkerPool};
pub use protocol::{Hints, RawFeatures};
