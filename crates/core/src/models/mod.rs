pub mod dead_letter;
pub mod lease;
pub mod monitoring;
pub mod task;
pub mod tier;
pub mod transition;
pub mod worker;

pub use dead_letter::{DeadLetterEntry, FailureReason};
pub use lease::Lease;
pub use monitoring::{MonitoringSnapshot, QueueMetrics, TierSnapshot, WorkerCounts};
pub use task::{Task, TaskId, TaskStatus};
pub use tier::{QueueTier, Tier};
pub use transition::{LedgerFilter, LedgerHead, Transition};
pub use worker::{PoolEvent, WorkerId, WorkerRecord, WorkerState};
