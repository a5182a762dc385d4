//! Entry points the OS calls when a registered task fires.
//!
//! Both entry points share a [`Dispatcher`] that hands the firing to the
//! owner on the main thread and tracks it until the owner (or the OS)
//! resolves it.

mod deferred;
mod exact;
mod firing;

use std::sync::Arc;

use bts_core::TaskId;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::extras::Extras;
use crate::main_thread::MainThread;
use crate::scheduler::BackgroundTaskScheduler;
use crate::task::{TaskContext, TaskParameters};

pub use deferred::DeferredTaskEntryPoint;
pub use exact::{constraints_satisfied, DeviceState, ExactTaskEntryPoint, NetworkState};
pub use firing::{Completion, TaskFinishedCallback, TaskResult};

use firing::{Firing, InFlight};

/// What an entry point reports back to the OS primitive.
#[derive(Debug)]
pub enum StartOutcome {
    /// Fired before its window opened; ask the OS to try again.
    Retry,
    /// Over without the owner doing work: dropped, declined or unowned.
    Finished(TaskResult),
    /// The owner accepted the firing; the verdict arrives on the completion.
    Running(Completion),
}

impl StartOutcome {
    /// The verdict if it is already known.
    pub fn result(&self) -> Option<TaskResult> {
        match self {
            StartOutcome::Finished(result) => Some(*result),
            StartOutcome::Retry | StartOutcome::Running(_) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, StartOutcome::Running(_))
    }
}

pub(crate) struct Dispatcher {
    scheduler: Arc<BackgroundTaskScheduler>,
    main: MainThread,
    in_flight: Arc<InFlight>,
}

impl Dispatcher {
    pub(crate) fn new(scheduler: Arc<BackgroundTaskScheduler>, main: MainThread) -> Self {
        Self {
            scheduler,
            main,
            in_flight: Arc::new(InFlight::new()),
        }
    }

    pub(crate) fn scheduler(&self) -> &BackgroundTaskScheduler {
        &self.scheduler
    }

    /// Resolve the owner on the main thread and call `on_start_task`,
    /// blocking until it returns.
    pub(crate) fn start(
        &self,
        task_id: TaskId,
        extras: Extras,
        registration_id: Option<Uuid>,
        removes_record: bool,
    ) -> StartOutcome {
        let params = TaskParameters { task_id, extras };
        let (firing, completion) = Firing::new(
            params,
            registration_id,
            removes_record,
            Arc::clone(self.scheduler.registry()),
            Arc::clone(&self.in_flight),
        );
        let span = info_span!("firing", %task_id, firing_id = %firing.firing_id);
        let _enter = span.enter();

        self.in_flight.insert(task_id, Arc::clone(&firing));

        let scheduler = Arc::clone(&self.scheduler);
        let on_main = Arc::clone(&firing);
        let started = self.main.run_blocking(move || {
            let ctx = TaskContext::new(&scheduler);
            let mut owner = scheduler.factory().background_task(task_id)?;
            scheduler.telemetry().report_task_started(task_id);
            let callback = TaskFinishedCallback::new(Arc::clone(&on_main));
            let started = owner.on_start_task(&ctx, &on_main.params, callback);
            if started {
                on_main.park_owner(owner);
            }
            Some(started)
        });

        match started {
            Ok(Some(true)) => {
                info!("task started");
                StartOutcome::Running(completion)
            }
            Ok(Some(false)) => {
                info!("owner declined the firing");
                firing.finish(TaskResult::Failure);
                StartOutcome::Finished(TaskResult::Failure)
            }
            Ok(None) => {
                warn!("no owner registered for task id");
                firing.finish(TaskResult::Failure);
                StartOutcome::Finished(TaskResult::Failure)
            }
            Err(e) => {
                warn!("could not reach the main thread: {e}");
                firing.finish(TaskResult::Failure);
                StartOutcome::Finished(TaskResult::Failure)
            }
        }
    }

    /// The OS is stopping `task_id`'s running firing. Returns whether the OS
    /// should reschedule it.
    pub(crate) fn stop(&self, task_id: TaskId) -> bool {
        let Some(firing) = self.in_flight.get(&task_id).map(|f| Arc::clone(f.value())) else {
            return false;
        };
        let span = info_span!("firing", %task_id, firing_id = %firing.firing_id);
        let _enter = span.enter();

        let Some(mut owner) = firing.take_owner() else {
            return Self::resolve(&firing, TaskResult::Failure);
        };
        self.scheduler.telemetry().report_task_stopped(task_id);

        let scheduler = Arc::clone(&self.scheduler);
        let on_main = Arc::clone(&firing);
        let reschedule = self
            .main
            .run_blocking(move || {
                let ctx = TaskContext::new(&scheduler);
                owner.on_stop_task(&ctx, &on_main.params)
            })
            .unwrap_or_else(|e| {
                warn!("could not reach the main thread: {e}");
                false
            });

        let result = if reschedule {
            TaskResult::Reschedule
        } else {
            TaskResult::Failure
        };
        info!(reschedule, "task stopped by the OS");
        Self::resolve(&firing, result)
    }

    /// Finish `firing` with `result` unless the owner got there first, and
    /// report whether the result that stuck asks for a reschedule.
    fn resolve(firing: &Firing, result: TaskResult) -> bool {
        if !firing.finish(result) {
            info!(outcome = ?firing.outcome(), "firing already resolved by its owner");
        }
        firing.outcome() == Some(TaskResult::Reschedule)
    }

    /// Whether a firing for `task_id` is still waiting for its verdict.
    pub(crate) fn is_running(&self, task_id: TaskId) -> bool {
        self.in_flight.contains_key(&task_id)
    }
}
