//! Worker Controller: advertises configured actions to a Master, runs
//! commands dispatched to it, and participates in the worker-to-worker
//! disk-handoff protocol when a Runner's working directory needs to move
//! between two Workers mid-job.

mod action_runner;
mod cron_job;
mod error;
mod handoff;
mod logger;
mod worker;

pub use action_runner::ActionRunner;
pub use cron_job::CleanJob;
pub use error::WorkerError;
pub use handoff::{HandoffReceiver, HandoffSender};
pub use worker::Worker;
