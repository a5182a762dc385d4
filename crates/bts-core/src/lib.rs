//! `bts-core`: configuration, identifiers and the shared error type used by
//! every crate in the background task scheduler workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::SchedulerConfig;
pub use error::{BtsError, Result};
pub use types::{OsVersion, TaskId};
