//! OS scheduling backends and the policy that picks one per task.
//!
//! Each backend wraps one external primitive behind a small service trait.
//! Selection is a pure function of the timing variant and the OS version.
//! The chosen [`BackendKind`] is stored with the task's record, so cancel and
//! OS-upgrade migration release the backend that actually holds it.

mod exact;
mod legacy;
mod modern;

use std::sync::Arc;

use bts_core::{OsVersion, TaskId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackendError, UnknownBackendKind};
use crate::types::{TaskInfo, TimingInfo};

pub use exact::{AlarmRequest, AlarmService, ExactDelegate};
pub use legacy::{LegacyDeferredDelegate, LegacySchedule, LegacyTaskRequest, LegacyTaskService};
pub use modern::{JobRequest, JobService, JobTrigger, ModernJobDelegate};

/// Which primitive owns a task's OS-level registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Exact,
    LegacyDeferred,
    ModernJob,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Exact => "exact",
            BackendKind::LegacyDeferred => "legacy_deferred",
            BackendKind::ModernJob => "modern_job",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = UnknownBackendKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(BackendKind::Exact),
            "legacy_deferred" => Ok(BackendKind::LegacyDeferred),
            "modern_job" => Ok(BackendKind::ModernJob),
            other => Err(UnknownBackendKind(other.to_string())),
        }
    }
}

/// Backend selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendPolicy {
    /// One-off and periodic work uses the modern job backend from this
    /// version on.
    pub modern_min_os_version: OsVersion,
}

impl BackendPolicy {
    pub fn new(modern_min_os_version: OsVersion) -> Self {
        Self {
            modern_min_os_version,
        }
    }

    pub fn select(&self, timing: &TimingInfo, os_version: OsVersion) -> BackendKind {
        match timing {
            TimingInfo::Exact { .. } => BackendKind::Exact,
            TimingInfo::OneOff { .. } | TimingInfo::Periodic { .. } => {
                if self.is_modern(os_version) {
                    BackendKind::ModernJob
                } else {
                    BackendKind::LegacyDeferred
                }
            }
        }
    }

    pub fn is_modern(&self, os_version: OsVersion) -> bool {
        os_version >= self.modern_min_os_version
    }

    /// Whether moving from `from` to `to` changes the deferred backend.
    pub fn crosses_threshold(&self, from: OsVersion, to: OsVersion) -> bool {
        self.is_modern(from) != self.is_modern(to)
    }
}

/// The three delegates, addressed by [`BackendKind`].
pub struct Backends {
    exact: ExactDelegate,
    legacy: LegacyDeferredDelegate,
    modern: ModernJobDelegate,
}

impl Backends {
    pub fn new(
        alarms: Arc<dyn AlarmService>,
        legacy: Arc<dyn LegacyTaskService>,
        jobs: Arc<dyn JobService>,
    ) -> Self {
        Self {
            exact: ExactDelegate::new(alarms),
            legacy: LegacyDeferredDelegate::new(legacy),
            modern: ModernJobDelegate::new(jobs),
        }
    }

    /// Register `task` with the `kind` backend; `scheduled_at_ms` anchors the
    /// task's relative window and is echoed back in the delivery payload.
    pub fn register(
        &self,
        kind: BackendKind,
        task: &TaskInfo,
        scheduled_at_ms: i64,
    ) -> Result<(), BackendError> {
        debug!(task_id = %task.task_id(), backend = %kind, "registering with backend");
        match kind {
            BackendKind::Exact => self.exact.register(task),
            BackendKind::LegacyDeferred => self.legacy.register(task, scheduled_at_ms),
            BackendKind::ModernJob => self.modern.register(task, scheduled_at_ms),
        }
    }

    pub fn unregister(&self, kind: BackendKind, task_id: TaskId) -> Result<(), BackendError> {
        debug!(%task_id, backend = %kind, "unregistering from backend");
        match kind {
            BackendKind::Exact => self.exact.unregister(task_id),
            BackendKind::LegacyDeferred => self.legacy.unregister(task_id),
            BackendKind::ModernJob => self.modern.unregister(task_id),
        }
    }
}

fn wrong_timing(backend: BackendKind, timing: &TimingInfo) -> BackendError {
    BackendError::Rejected(format!("{backend} backend cannot run {} timing", timing.kind()))
}
