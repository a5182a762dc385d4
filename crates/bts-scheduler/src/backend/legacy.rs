use std::sync::Arc;

use bts_core::TaskId;

use super::{wrong_timing, BackendKind};
use crate::error::BackendError;
use crate::payload::DeliveryPayload;
use crate::types::{NetworkType, TaskInfo, TimingInfo};

/// Timing in the legacy service's units: whole seconds, relative to the
/// moment of submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacySchedule {
    OneOff {
        window_start_secs: i64,
        window_end_secs: i64,
    },
    Periodic {
        period_secs: i64,
        flex_secs: Option<i64>,
    },
}

/// Submission for the pre-modern deferred execution service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTaskRequest {
    /// The legacy service identifies work by string tag; we use the task id.
    pub tag: String,
    pub schedule: LegacySchedule,
    pub requires_charging: bool,
    pub required_network: NetworkType,
    pub persisted: bool,
    /// Replace an existing submission with the same tag.
    pub update_current: bool,
    pub payload: DeliveryPayload,
}

/// Pre-modern deferred/periodic execution primitive.
pub trait LegacyTaskService: Send + Sync {
    /// The service depends on components that may be missing on a device.
    fn is_available(&self) -> bool;
    fn schedule(&self, request: LegacyTaskRequest) -> Result<(), BackendError>;
    fn cancel(&self, tag: &str) -> Result<(), BackendError>;
}

/// Delegate for one-off/periodic tasks below the modern OS threshold.
pub struct LegacyDeferredDelegate {
    service: Arc<dyn LegacyTaskService>,
}

impl LegacyDeferredDelegate {
    pub fn new(service: Arc<dyn LegacyTaskService>) -> Self {
        Self { service }
    }

    pub fn register(&self, task: &TaskInfo, scheduled_at_ms: i64) -> Result<(), BackendError> {
        if !self.service.is_available() {
            return Err(BackendError::Unavailable(
                "legacy deferred service is not installed".to_string(),
            ));
        }
        let schedule = match *task.timing() {
            TimingInfo::OneOff {
                window_start_ms,
                window_end_ms,
                ..
            } => LegacySchedule::OneOff {
                window_start_secs: floor_secs(window_start_ms.unwrap_or(0)),
                window_end_secs: ceil_secs(window_end_ms),
            },
            TimingInfo::Periodic {
                interval_ms,
                flex_ms,
            } => LegacySchedule::Periodic {
                period_secs: ceil_secs(interval_ms).max(1),
                flex_secs: flex_ms.map(floor_secs),
            },
            TimingInfo::Exact { .. } => {
                return Err(wrong_timing(BackendKind::LegacyDeferred, task.timing()))
            }
        };
        let payload = DeliveryPayload::for_task(task, scheduled_at_ms)
            .ok_or_else(|| wrong_timing(BackendKind::LegacyDeferred, task.timing()))?;

        let constraints = task.constraints();
        self.service.schedule(LegacyTaskRequest {
            tag: task_tag(task.task_id()),
            schedule,
            requires_charging: constraints.requires_charging,
            required_network: constraints.required_network,
            persisted: task.is_persisted(),
            update_current: true,
            payload,
        })
    }

    pub fn unregister(&self, task_id: TaskId) -> Result<(), BackendError> {
        if !self.service.is_available() {
            return Err(BackendError::Unavailable(
                "legacy deferred service is not installed".to_string(),
            ));
        }
        self.service.cancel(&task_tag(task_id))
    }
}

fn task_tag(task_id: TaskId) -> String {
    task_id.to_string()
}

fn floor_secs(ms: i64) -> i64 {
    ms.div_euclid(1_000)
}

fn ceil_secs(ms: i64) -> i64 {
    let secs = ms.div_euclid(1_000);
    if ms.rem_euclid(1_000) == 0 {
        secs
    } else {
        secs + 1
    }
}
