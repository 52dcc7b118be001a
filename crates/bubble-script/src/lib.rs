//! Script parsing, command/group model and per-command payload log shared
//! by the Master's Runner and the API surface that reads command output.

mod command;
mod error;
mod interpreter;
mod payload;
mod status;

pub use command::{Command, When};
pub use error::ScriptError;
pub use interpreter::{parse, Group};
pub use payload::{PayloadError, PayloadLog, SEGMENT_LEN};
pub use status::Status;
