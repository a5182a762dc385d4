use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use bts_core::{OsVersion, SchedulerConfig, TaskId};
use dashmap::DashMap;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BackendKind, BackendPolicy, Backends};
use crate::clock::{Clock, SystemClock};
use crate::registry::{ScheduledTaskRecord, TaskRegistry};
use crate::task::{BackgroundTaskFactory, TaskContext};
use crate::telemetry::{TelemetrySink, TracingTelemetry};
use crate::types::{TaskInfo, TimingInfo};

/// Facade used by features to schedule and cancel background work.
///
/// Control calls run synchronously on the caller's thread. Calls for the
/// same task id are serialized; distinct ids proceed independently.
pub struct BackgroundTaskScheduler {
    registry: Arc<TaskRegistry>,
    backends: Backends,
    policy: BackendPolicy,
    os_version: OsVersion,
    factory: Arc<dyn BackgroundTaskFactory>,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    task_locks: DashMap<TaskId, Arc<Mutex<()>>>,
}

/// Builder for [`BackgroundTaskScheduler`].
pub struct SchedulerBuilder {
    registry: Arc<TaskRegistry>,
    backends: Backends,
    factory: Arc<dyn BackgroundTaskFactory>,
    os_version: OsVersion,
    policy: BackendPolicy,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    /// Take the backend threshold from `config`.
    pub fn config(mut self, config: &SchedulerConfig) -> Self {
        self.policy = BackendPolicy::new(config.modern_threshold());
        self
    }

    pub fn policy(mut self, policy: BackendPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> BackgroundTaskScheduler {
        BackgroundTaskScheduler {
            registry: self.registry,
            backends: self.backends,
            policy: self.policy,
            os_version: self.os_version,
            factory: self.factory,
            telemetry: self.telemetry,
            clock: self.clock,
            task_locks: DashMap::new(),
        }
    }
}

impl BackgroundTaskScheduler {
    /// Start building a scheduler for a process running on `os_version`.
    pub fn builder(
        registry: Arc<TaskRegistry>,
        backends: Backends,
        factory: Arc<dyn BackgroundTaskFactory>,
        os_version: OsVersion,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            registry,
            backends,
            factory,
            os_version,
            policy: BackendPolicy::new(SchedulerConfig::default().modern_threshold()),
            telemetry: Arc::new(TracingTelemetry),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn factory(&self) -> &dyn BackgroundTaskFactory {
        self.factory.as_ref()
    }

    pub fn telemetry(&self) -> &dyn TelemetrySink {
        self.telemetry.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn policy(&self) -> BackendPolicy {
        self.policy
    }

    pub fn os_version(&self) -> OsVersion {
        self.os_version
    }

    /// Backend that would handle `timing` on this OS version.
    pub fn backend_for(&self, timing: &TimingInfo) -> BackendKind {
        self.policy.select(timing, self.os_version)
    }

    fn task_lock(&self, task_id: TaskId) -> Arc<Mutex<()>> {
        Arc::clone(self.task_locks.entry(task_id).or_default().value())
    }

    /// Register `task` with its backend and record it. Scheduling an id that
    /// is already outstanding replaces the earlier registration.
    ///
    /// Returns `false` if encoding or registration fails; nothing is
    /// persisted in that case.
    #[instrument(skip(self, task), fields(task_id = %task.task_id()))]
    pub fn schedule(&self, task: &TaskInfo) -> bool {
        let task_id = task.task_id();
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let encoded = match task.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("cannot encode task: {e}");
                self.telemetry.report_task_scheduled(task_id, false);
                return false;
            }
        };

        if let TimingInfo::OneOff { .. } = task.timing() {
            self.telemetry
                .report_task_created_and_expiration_state(task_id, task.timing().expires());
        }

        let kind = self.backend_for(task.timing());
        self.release_previous_backend(task_id, kind);

        let scheduled_at_ms = self.clock.now_ms();
        if let Err(e) = self.backends.register(kind, task, scheduled_at_ms) {
            warn!(backend = %kind, "backend rejected task: {e}");
            self.telemetry.report_task_scheduled(task_id, false);
            return false;
        }

        let record = ScheduledTaskRecord::new(task, encoded, kind, scheduled_at_ms);
        if let Err(e) = self.registry.put(&record) {
            error!("failed to persist task, rolling back registration: {e}");
            if let Err(e) = self.backends.unregister(kind, task_id) {
                warn!(backend = %kind, "rollback unregister failed: {e}");
            }
            self.telemetry.report_task_scheduled(task_id, false);
            return false;
        }

        info!(backend = %kind, scheduled_at_ms, "task scheduled");
        self.telemetry.report_task_scheduled(task_id, true);
        true
    }

    /// When a task is replaced by one that lands on a different backend, the
    /// old registration would otherwise keep firing.
    fn release_previous_backend(&self, task_id: TaskId, next: BackendKind) {
        let Some(previous) = self.recorded_backend(task_id) else {
            return;
        };
        if previous != next {
            debug!(from = %previous, to = %next, "task moves to another backend");
            if let Err(e) = self.backends.unregister(previous, task_id) {
                warn!(backend = %previous, "failed to release previous registration: {e}");
            }
        }
    }

    /// Backend stored with the task's record, if there is a readable one.
    fn recorded_backend(&self, task_id: TaskId) -> Option<BackendKind> {
        match self.registry.get(task_id) {
            Ok(record) => record.map(|r| r.backend),
            Err(e) => {
                warn!(%task_id, "registry lookup failed: {e}");
                None
            }
        }
    }

    /// Unregister `task_id` from the backend recorded for it and forget it.
    ///
    /// The record is removed even when the backend call fails or no record
    /// existed. Unknown ids touch no backend.
    #[instrument(skip(self))]
    pub fn cancel(&self, task_id: TaskId) {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        match self.recorded_backend(task_id) {
            Some(kind) => {
                if let Err(e) = self.backends.unregister(kind, task_id) {
                    warn!(backend = %kind, "backend unregister failed: {e}");
                }
            }
            None => debug!("no recorded backend; nothing to unregister"),
        }

        match self.registry.remove(task_id) {
            Ok(removed) => info!(removed, "task canceled"),
            Err(e) => error!("failed to remove canceled task: {e}"),
        }
        self.telemetry.report_task_canceled(task_id);
    }

    /// Clear the registry and ask every resolvable owner to resubmit.
    ///
    /// Ids whose owner cannot be resolved are dropped. The snapshot is taken
    /// and cleared in one step before owners run, so what they resubmit is
    /// kept.
    #[instrument(skip(self))]
    pub fn reschedule(&self) {
        let records = match self.registry.take_all() {
            Ok(records) => records,
            Err(e) => {
                error!("failed to snapshot registry, clearing it: {e}");
                if let Err(e) = self.registry.clear() {
                    error!("failed to clear registry: {e}");
                }
                return;
            }
        };
        info!(count = records.len(), "rescheduling all tasks");

        let ctx = TaskContext::new(self);
        for record in records {
            match self.factory.background_task(record.task_id) {
                Some(mut owner) => {
                    debug!(task_id = %record.task_id, "asking owner to reschedule");
                    owner.reschedule(&ctx);
                }
                None => warn!(task_id = %record.task_id, "no owner for task; dropping it"),
            }
        }
    }

    /// Host process start-up hook, run once before any `schedule` call.
    ///
    /// Releases tasks the previous process did not mark persisted, then
    /// checks for an OS upgrade.
    pub fn startup(&self) {
        self.release_transient_tasks();
        self.check_for_os_upgrade();
    }

    /// Unregister and forget every record not marked persisted. Their OS
    /// registrations outlive the process that made them.
    #[instrument(skip(self))]
    pub fn release_transient_tasks(&self) {
        let records = match self.registry.take_transient() {
            Ok(records) => records,
            Err(e) => {
                error!("failed to read transient tasks: {e}");
                return;
            }
        };
        for record in records {
            let task_id = record.task_id;
            match self.backends.unregister(record.backend, task_id) {
                Ok(()) => info!(
                    %task_id,
                    backend = %record.backend,
                    "released task from previous run"
                ),
                Err(e) => warn!(
                    %task_id,
                    backend = %record.backend,
                    "failed to release transient task: {e}"
                ),
            }
            self.telemetry.report_task_canceled(task_id);
        }
    }

    /// Compare the last observed OS version with the current one and migrate
    /// tasks if the deferred backend changes between them.
    ///
    /// Part of [`startup`](Self::startup); may also be called on its own.
    #[instrument(skip(self), fields(current = %self.os_version))]
    pub fn check_for_os_upgrade(&self) {
        let current = self.os_version;
        let previous = match self.registry.last_os_version() {
            Ok(previous) => previous,
            Err(e) => {
                error!("failed to read last OS version: {e}");
                None
            }
        };

        if previous != Some(current) {
            self.telemetry.report_os_upgrade(previous, current);
        }

        match previous {
            Some(previous) if self.policy.crosses_threshold(previous, current) => {
                info!(%previous, "OS version crossed the backend threshold; migrating");
                self.unregister_legacy_tasks();
                self.reschedule();
            }
            _ => debug!(?previous, "no backend migration needed"),
        }

        if let Err(e) = self.registry.set_last_os_version(current) {
            error!("failed to record OS version: {e}");
        }
    }

    /// Best effort: a legacy registration that survives will drop itself
    /// when it fires, since its task is no longer in the registry.
    fn unregister_legacy_tasks(&self) {
        let records = match self.registry.records() {
            Ok(records) => records,
            Err(e) => {
                error!("failed to read registry for migration: {e}");
                return;
            }
        };
        for record in records {
            if record.backend != BackendKind::LegacyDeferred {
                continue;
            }
            if let Err(e) = self
                .backends
                .unregister(BackendKind::LegacyDeferred, record.task_id)
            {
                warn!(task_id = %record.task_id, "legacy unregister failed during migration: {e}");
            }
        }
    }

    pub fn is_scheduled(&self, task_id: TaskId) -> bool {
        self.registry.contains(task_id).unwrap_or_else(|e| {
            error!(%task_id, "registry lookup failed: {e}");
            false
        })
    }

    pub fn scheduled_task_ids(&self) -> BTreeSet<TaskId> {
        self.registry.ids().unwrap_or_else(|e| {
            error!("registry lookup failed: {e}");
            BTreeSet::new()
        })
    }
}
