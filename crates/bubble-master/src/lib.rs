//! Master Controller: Jobs, Runners, Worker proxies and the `Select`
//! matching algorithm (spec.md §4.3/§4.4/§4.7 master-side, §4.8 master-side
//! RPC surface).

mod ctx;
mod error;
mod job;
mod master;
mod runner;
mod worker;

pub use ctx::{Ctx, ResultWaiter};
pub use error::MasterError;
pub use job::{Job, PAGE_SIZE};
pub use master::Master;
pub use runner::Runner;
pub use worker::Worker;
