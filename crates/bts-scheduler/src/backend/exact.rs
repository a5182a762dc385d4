use std::sync::Arc;

use bts_core::TaskId;

use super::{wrong_timing, BackendKind};
use crate::error::BackendError;
use crate::types::{TaskInfo, TimingInfo};

/// Wake-up request for the alarm primitive. The only payload delivered back
/// on firing is the task id; everything else is read from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRequest {
    pub task_id: TaskId,
    pub trigger_at_ms: i64,
}

/// Fire-at-time primitive (system alarm).
pub trait AlarmService: Send + Sync {
    /// Set or replace the alarm for `request.task_id`.
    fn set_exact(&self, request: AlarmRequest) -> Result<(), BackendError>;
    fn cancel(&self, task_id: TaskId) -> Result<(), BackendError>;
}

/// Delegate for [`TimingInfo::Exact`] tasks on every OS version.
pub struct ExactDelegate {
    alarms: Arc<dyn AlarmService>,
}

impl ExactDelegate {
    pub fn new(alarms: Arc<dyn AlarmService>) -> Self {
        Self { alarms }
    }

    pub fn register(&self, task: &TaskInfo) -> Result<(), BackendError> {
        let TimingInfo::Exact { trigger_at_ms } = *task.timing() else {
            return Err(wrong_timing(BackendKind::Exact, task.timing()));
        };
        self.alarms.set_exact(AlarmRequest {
            task_id: task.task_id(),
            trigger_at_ms,
        })
    }

    pub fn unregister(&self, task_id: TaskId) -> Result<(), BackendError> {
        self.alarms.cancel(task_id)
    }
}
