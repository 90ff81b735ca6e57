//! Ferry background work
//!
//! The file table is the queue. This crate holds everything that moves records
//! through it without a caller waiting:
//!
//! - [`Committer`]: claims one file and commits it to the durable network.
//! - [`Dispatcher`]: one scheduling pass, planned by [`plan_dispatch`].
//! - [`StaleJobReaper`]: recovers claims abandoned by dead committers.
//! - [`UploadWatcher`]: releases presigned records once their bytes are staged.
//! - [`StagingJanitor`]: removes staged copies once their grace window has passed.
//! - [`TickScheduler`]: in-process periodic trigger for the dispatcher.

pub mod committer;
pub mod dispatcher;
pub mod janitor;
pub mod reaper;
pub mod scheduler;
pub mod uploads;

pub use committer::{CommitOutcome, CommitReport, Committer};
pub use dispatcher::{plan_dispatch, Dispatcher, TickReport, TickSummary};
pub use janitor::StagingJanitor;
pub use reaper::StaleJobReaper;
pub use scheduler::TickScheduler;
pub use uploads::UploadWatcher;
