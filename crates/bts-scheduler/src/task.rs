use bts_core::TaskId;

use crate::dispatch::TaskFinishedCallback;
use crate::extras::Extras;
use crate::scheduler::BackgroundTaskScheduler;

/// What the owner learns about a firing.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskParameters {
    pub task_id: TaskId,
    pub extras: Extras,
}

/// Handle given to task owners during callbacks.
pub struct TaskContext<'a> {
    scheduler: &'a BackgroundTaskScheduler,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(scheduler: &'a BackgroundTaskScheduler) -> Self {
        Self { scheduler }
    }

    /// The scheduler, for owners that resubmit work.
    pub fn scheduler(&self) -> &'a BackgroundTaskScheduler {
        self.scheduler
    }
}

/// Implemented by the feature that owns a task id.
///
/// `on_start_task` and `on_stop_task` always run on the main thread.
pub trait BackgroundTask: Send {
    /// Begin work for a firing. Must not block: return `true` and report
    /// later through `callback`, or return `false` if there is nothing to do.
    fn on_start_task(
        &mut self,
        ctx: &TaskContext<'_>,
        params: &TaskParameters,
        callback: TaskFinishedCallback,
    ) -> bool;

    /// The OS is stopping a running firing. Return whether it should be
    /// rescheduled.
    fn on_stop_task(&mut self, ctx: &TaskContext<'_>, params: &TaskParameters) -> bool;

    /// Rebuild and resubmit this task through `ctx.scheduler()`.
    fn reschedule(&mut self, ctx: &TaskContext<'_>);
}

/// Resolves which feature owns a task id. `None` is a normal answer.
pub trait BackgroundTaskFactory: Send + Sync {
    fn background_task(&self, task_id: TaskId) -> Option<Box<dyn BackgroundTask>>;
}
