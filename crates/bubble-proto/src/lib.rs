mod call;
mod client;
mod error;
mod server;
#[cfg(test)]
mod tests;
mod types;

pub use call::{MasterApi, WorkerApi};
pub use client::HttpAsyncCall;
pub use error::ProtoError;
pub use server::{serve_master, serve_worker};
pub use types::*;
