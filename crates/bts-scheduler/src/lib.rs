//! `bts-scheduler`: background task scheduling core.
//!
//! # Overview
//!
//! Features describe work as a [`TaskInfo`] and hand it to the
//! [`BackgroundTaskScheduler`]. The scheduler picks an OS backend, registers
//! the task there and records it in the SQLite-backed [`TaskRegistry`] so it
//! can be rebuilt after process death or an OS upgrade. When the OS fires the
//! task, one of the dispatch entry points re-checks the deadline window (or
//! device constraints) and calls the owning [`BackgroundTask`] on the main
//! thread.
//!
//! # Backends
//!
//! | Timing              | OS version            | Backend            |
//! |---------------------|-----------------------|--------------------|
//! | `Exact`             | any                   | alarm              |
//! | `OneOff`/`Periodic` | below threshold       | legacy deferred    |
//! | `OneOff`/`Periodic` | threshold and above   | modern job service |

pub mod backend;
pub mod clock;
pub mod db;
pub mod deadline;
pub mod dispatch;
pub mod error;
pub mod extras;
pub mod main_thread;
pub mod payload;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod test_support;

pub use backend::{BackendKind, BackendPolicy, Backends};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{
    Completion, DeferredTaskEntryPoint, DeviceState, ExactTaskEntryPoint, NetworkState,
    StartOutcome, TaskFinishedCallback, TaskResult,
};
pub use error::{
    BackendError, CodecError, DispatchError, RegistryError, TaskInfoError, UnknownBackendKind,
};
pub use extras::{ExtraValue, Extras};
pub use main_thread::{MainLoop, MainThread};
pub use payload::DeliveryPayload;
pub use registry::{ScheduledTaskRecord, TaskRegistry};
pub use scheduler::{BackgroundTaskScheduler, SchedulerBuilder};
pub use task::{BackgroundTask, BackgroundTaskFactory, TaskContext, TaskParameters};
pub use telemetry::{NoopTelemetry, TelemetrySink, TracingTelemetry};
pub use types::{Constraints, NetworkType, TaskInfo, TaskInfoBuilder, TimingInfo, TimingKind};
