pub mod job;
pub mod manifest;
pub mod outcome;
pub mod queue;

pub use job::JobSpec;
pub use outcome::{JobOutcome, OutcomeLog, OutcomeResult, RunSummary};
pub use queue::{JobQueue, QueueEntry};
