//! Task model: jobs, status records, the shared ledger and the job queue.

mod ledger;
mod queue;
mod types;

pub use ledger::{LedgerError, StateCounts, StatusLedger, StopError};
pub use queue::TaskQueue;
pub use types::*;
