use std::sync::Arc;

use bts_core::TaskId;
use tracing::{debug, info, warn};

use super::{Dispatcher, StartOutcome, TaskResult};
use crate::deadline::{self, DeadlineCheck};
use crate::main_thread::MainThread;
use crate::payload::DeliveryPayload;
use crate::scheduler::BackgroundTaskScheduler;

/// Service-style callback for one-off and periodic tasks, invoked by the
/// legacy and modern job backends.
pub struct DeferredTaskEntryPoint {
    dispatcher: Dispatcher,
}

impl DeferredTaskEntryPoint {
    pub fn new(scheduler: Arc<BackgroundTaskScheduler>, main: MainThread) -> Self {
        Self {
            dispatcher: Dispatcher::new(scheduler, main),
        }
    }

    /// The OS started the job carrying `payload`.
    pub fn on_start_job(&self, payload: &DeliveryPayload) -> StartOutcome {
        let task_id = payload.task_id;
        let extras = match payload.decode_extras() {
            Ok(extras) => extras,
            Err(e) => {
                warn!(%task_id, "dropping firing with undecodable extras: {e}");
                return StartOutcome::Finished(TaskResult::Failure);
            }
        };

        let scheduler = self.dispatcher.scheduler();
        let now_ms = scheduler.clock().now_ms();
        match deadline::check(payload, now_ms) {
            DeadlineCheck::Premature => {
                debug!(%task_id, now_ms, "fired before its window; asking for retry");
                StartOutcome::Retry
            }
            DeadlineCheck::Expired => {
                info!(%task_id, now_ms, "fired outside its window; dropping");
                scheduler.telemetry().report_task_expired(task_id);
                StartOutcome::Finished(TaskResult::Failure)
            }
            DeadlineCheck::Valid => {
                let registration_id = match scheduler.registry().get(task_id) {
                    Ok(record) => record.map(|r| r.registration_id),
                    Err(e) => {
                        warn!(%task_id, "registry lookup failed; record will be kept: {e}");
                        None
                    }
                };
                self.dispatcher
                    .start(task_id, extras, registration_id, !payload.is_periodic())
            }
        }
    }

    /// The OS is stopping a running job; returns whether to reschedule it.
    pub fn on_stop_job(&self, task_id: TaskId) -> bool {
        self.dispatcher.stop(task_id)
    }

    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.dispatcher.is_running(task_id)
    }
}
