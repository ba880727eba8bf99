//! Job control for the tiny shell.
//!
//! Tracks child jobs in a fixed-capacity table, launches single commands and
//! pipelines into their own process groups, blocks the shell on its
//! foreground job, and relays SIGCHLD/SIGINT/SIGTSTP/SIGQUIT.
//!
//! - `table` - fixed-capacity job registry
//! - `launch` - fork/exec of single commands and pipelines
//! - `relay` - signal subscriptions, reaping, and keyboard-signal forwarding
//! - `control` - [`JobControl`], the API the shell front-end calls

#[cfg(not(unix))]
compile_error!("tsh_jobs requires a Unix host");

pub mod config;
pub mod control;
pub mod error;
pub mod job;
mod launch;
mod relay;
pub mod table;

pub use config::{JobControlConfig, DEFAULT_MAX_JOBS};
pub use control::JobControl;
pub use error::{JobError, JobErrorCode};
pub use job::{Job, JobId, JobNotice, JobState, Member, MemberStatus};
pub use table::JobTable;

/// Process id type used throughout the API.
pub use nix::unistd::Pid;
