use std::sync::Arc;

use bts_core::TaskId;

use super::{wrong_timing, BackendKind};
use crate::error::BackendError;
use crate::payload::DeliveryPayload;
use crate::types::{NetworkType, TaskInfo, TimingInfo};

/// Trigger in the native job scheduler's terms, relative to submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTrigger {
    OneOff {
        min_latency_ms: i64,
        /// The OS runs the job by this point even if constraints are unmet.
        override_deadline_ms: Option<i64>,
    },
    Periodic {
        interval_ms: i64,
        flex_ms: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_id: TaskId,
    pub trigger: JobTrigger,
    pub requires_charging: bool,
    pub required_network: NetworkType,
    pub persisted: bool,
    pub payload: DeliveryPayload,
}

/// Current-generation native job scheduler.
pub trait JobService: Send + Sync {
    /// Schedule or replace the job with `request.job_id`.
    fn schedule(&self, request: JobRequest) -> Result<(), BackendError>;
    fn cancel(&self, job_id: TaskId) -> Result<(), BackendError>;
}

/// Delegate for one-off/periodic tasks at or above the modern OS threshold.
pub struct ModernJobDelegate {
    jobs: Arc<dyn JobService>,
}

impl ModernJobDelegate {
    pub fn new(jobs: Arc<dyn JobService>) -> Self {
        Self { jobs }
    }

    pub fn register(&self, task: &TaskInfo, scheduled_at_ms: i64) -> Result<(), BackendError> {
        let trigger = match *task.timing() {
            TimingInfo::OneOff {
                window_start_ms,
                window_end_ms,
                expires_after_window_end,
            } => JobTrigger::OneOff {
                min_latency_ms: window_start_ms.unwrap_or(0),
                // Only non-expiring tasks make the OS force a run by the window end.
                override_deadline_ms: (!expires_after_window_end).then_some(window_end_ms),
            },
            TimingInfo::Periodic {
                interval_ms,
                flex_ms,
            } => JobTrigger::Periodic {
                interval_ms,
                flex_ms,
            },
            TimingInfo::Exact { .. } => {
                return Err(wrong_timing(BackendKind::ModernJob, task.timing()))
            }
        };
        let payload = DeliveryPayload::for_task(task, scheduled_at_ms)
            .ok_or_else(|| wrong_timing(BackendKind::ModernJob, task.timing()))?;

        let constraints = task.constraints();
        self.jobs.schedule(JobRequest {
            job_id: task.task_id(),
            trigger,
            requires_charging: constraints.requires_charging,
            required_network: constraints.required_network,
            persisted: task.is_persisted(),
            payload,
        })
    }

    pub fn unregister(&self, task_id: TaskId) -> Result<(), BackendError> {
        self.jobs.cancel(task_id)
    }
}
