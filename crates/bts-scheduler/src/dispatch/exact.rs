use std::sync::Arc;

use bts_core::TaskId;
use tracing::{info, warn};

use super::{Dispatcher, StartOutcome, TaskResult};
use crate::main_thread::MainThread;
use crate::scheduler::BackgroundTaskScheduler;
use crate::types::{Constraints, NetworkType};

/// Current connectivity as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Disconnected,
    Metered,
    Unmetered,
}

/// Live device conditions, read when an exact task fires.
pub trait DeviceState: Send + Sync {
    fn is_charging(&self) -> bool;
    fn network(&self) -> NetworkState;
}

pub fn constraints_satisfied(constraints: Constraints, device: &dyn DeviceState) -> bool {
    if constraints.requires_charging && !device.is_charging() {
        return false;
    }
    match constraints.required_network {
        NetworkType::None => true,
        NetworkType::Any => device.network() != NetworkState::Disconnected,
        NetworkType::Unmetered => device.network() == NetworkState::Unmetered,
    }
}

/// Receiver-style callback for exact tasks, invoked by the alarm backend.
///
/// The alarm delivers only the task id; timing, constraints and extras come
/// from the registry.
pub struct ExactTaskEntryPoint {
    dispatcher: Dispatcher,
    device: Arc<dyn DeviceState>,
}

impl ExactTaskEntryPoint {
    pub fn new(
        scheduler: Arc<BackgroundTaskScheduler>,
        main: MainThread,
        device: Arc<dyn DeviceState>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(scheduler, main),
            device,
        }
    }

    pub fn on_alarm(&self, task_id: TaskId) -> StartOutcome {
        let registry = self.dispatcher.scheduler().registry();
        let record = match registry.get(task_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(%task_id, "alarm for a task that is not scheduled; dropping");
                return StartOutcome::Finished(TaskResult::Failure);
            }
            Err(e) => {
                warn!(%task_id, "registry lookup failed; dropping alarm: {e}");
                return StartOutcome::Finished(TaskResult::Failure);
            }
        };
        let task = match record.task_info() {
            Ok(task) => task,
            Err(e) => {
                warn!(%task_id, "dropping alarm: {e}");
                return StartOutcome::Finished(TaskResult::Failure);
            }
        };

        // Exact delivery cannot be deferred, so unmet constraints drop this
        // firing without telling the owner. The record is left in place.
        if !constraints_satisfied(task.constraints(), self.device.as_ref()) {
            info!(%task_id, "constraints not met at alarm time; dropping silently");
            return StartOutcome::Finished(TaskResult::Failure);
        }

        self.dispatcher
            .start(task_id, task.extras().clone(), Some(record.registration_id), true)
    }

    /// The OS is stopping a running exact task; returns whether the owner
    /// asked for a reschedule.
    pub fn on_stop(&self, task_id: TaskId) -> bool {
        self.dispatcher.stop(task_id)
    }

    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.dispatcher.is_running(task_id)
    }
}
