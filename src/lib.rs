//! A persistent, interactive shell-session executor.
//!
//! This crate runs shell commands the way an interactive terminal user
//! would: `cd` and `export` from one call are visible to the next, a
//! long-running command can be cancelled without losing the session it
//! ran in, and output streams out as it's produced rather than arriving
//! only at the end. It does not decide what to run or dispatch tool
//! calls -- that's the caller's job. It only runs commands and reports
//! what happened.

mod cancel;
mod config;
mod error;
mod executor;
mod marker;
mod oneshot;
mod output;
mod registry;
mod script;
mod session;

pub use cancel::CancelHandle;
pub use config::{ShellConfig, ShellFamily};
pub use error::ShellError;
pub use executor::{execute_bash, shutdown};
pub use output::{OutputSummary, DEFAULT_MAX_BYTES};
pub use session::{ExecuteOptions, ExecuteResult};
