//! Job execution.
//!
//! - [`JobExecutor`]: plans a job against its report schema, opens a fresh
//!   session, runs the steps and records the outcome
//! - [`WorkerPool`]: a fixed number of workers draining a shared queue
//!
//! # Execution Flow
//!
//! 1. [`WorkerPool::submit`] enqueues every job, then one sentinel per worker
//! 2. Each worker dequeues, runs [`JobExecutor::execute`] and acknowledges
//! 3. A worker that dequeues a sentinel stops
//! 4. `submit` returns once the queue is drained and all workers have stopped

pub mod executor;
pub mod pool;

pub use executor::{JobExecutor, JobPlan};
pub use pool::WorkerPool;
