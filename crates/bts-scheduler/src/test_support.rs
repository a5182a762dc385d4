//! Recording fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bts_core::{OsVersion, TaskId};

use crate::backend::{
    AlarmRequest, AlarmService, BackendPolicy, Backends, JobRequest, JobService,
    LegacyTaskRequest, LegacyTaskService,
};
use crate::clock::ManualClock;
use crate::dispatch::{DeviceState, NetworkState, TaskFinishedCallback};
use crate::error::BackendError;
use crate::registry::TaskRegistry;
use crate::scheduler::BackgroundTaskScheduler;
use crate::task::{BackgroundTask, BackgroundTaskFactory, TaskContext, TaskParameters};
use crate::telemetry::TelemetrySink;
use crate::types::TaskInfo;

pub const THRESHOLD: OsVersion = OsVersion(23);
pub const LEGACY_OS: OsVersion = OsVersion(22);
pub const MODERN_OS: OsVersion = OsVersion(23);
pub const START_MS: i64 = 1_700_000_000_000;

fn snapshot<T: Clone>(m: &Mutex<Vec<T>>) -> Vec<T> {
    m.lock().expect("fake poisoned").clone()
}

#[derive(Default)]
pub struct RecordingAlarms {
    set: Mutex<Vec<AlarmRequest>>,
    canceled: Mutex<Vec<TaskId>>,
}

impl RecordingAlarms {
    pub fn set_requests(&self) -> Vec<AlarmRequest> {
        snapshot(&self.set)
    }

    pub fn canceled(&self) -> Vec<TaskId> {
        snapshot(&self.canceled)
    }
}

impl AlarmService for RecordingAlarms {
    fn set_exact(&self, request: AlarmRequest) -> Result<(), BackendError> {
        self.set.lock().expect("fake poisoned").push(request);
        Ok(())
    }

    fn cancel(&self, task_id: TaskId) -> Result<(), BackendError> {
        self.canceled.lock().expect("fake poisoned").push(task_id);
        Ok(())
    }
}

pub struct RecordingLegacy {
    available: bool,
    fail_cancel: AtomicBool,
    scheduled: Mutex<Vec<LegacyTaskRequest>>,
    canceled: Mutex<Vec<String>>,
}

impl RecordingLegacy {
    pub fn available() -> Self {
        Self {
            available: true,
            fail_cancel: AtomicBool::new(false),
            scheduled: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    pub fn fail_cancels(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<LegacyTaskRequest> {
        snapshot(&self.scheduled)
    }

    pub fn canceled(&self) -> Vec<String> {
        snapshot(&self.canceled)
    }
}

impl LegacyTaskService for RecordingLegacy {
    fn is_available(&self) -> bool {
        self.available
    }

    fn schedule(&self, request: LegacyTaskRequest) -> Result<(), BackendError> {
        self.scheduled.lock().expect("fake poisoned").push(request);
        Ok(())
    }

    fn cancel(&self, tag: &str) -> Result<(), BackendError> {
        self.canceled.lock().expect("fake poisoned").push(tag.to_string());
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("cancel refused".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCall {
    Schedule,
    Cancel,
}

#[derive(Default)]
pub struct RecordingJobs {
    reject: AtomicBool,
    scheduled: Mutex<Vec<JobRequest>>,
    canceled: Mutex<Vec<TaskId>>,
    calls: Mutex<Vec<(TaskId, JobCall)>>,
}

impl RecordingJobs {
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<JobRequest> {
        snapshot(&self.scheduled)
    }

    pub fn canceled(&self) -> Vec<TaskId> {
        snapshot(&self.canceled)
    }

    /// The most recent accepted call for `job_id`.
    pub fn last_call(&self, job_id: TaskId) -> Option<JobCall> {
        snapshot(&self.calls)
            .into_iter()
            .rev()
            .find(|(id, _)| *id == job_id)
            .map(|(_, call)| call)
    }
}

impl JobService for RecordingJobs {
    fn schedule(&self, request: JobRequest) -> Result<(), BackendError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("job quota exceeded".into()));
        }
        self.calls
            .lock()
            .expect("fake poisoned")
            .push((request.job_id, JobCall::Schedule));
        self.scheduled.lock().expect("fake poisoned").push(request);
        Ok(())
    }

    fn cancel(&self, job_id: TaskId) -> Result<(), BackendError> {
        self.calls
            .lock()
            .expect("fake poisoned")
            .push((job_id, JobCall::Cancel));
        self.canceled.lock().expect("fake poisoned").push(job_id);
        let known = self
            .scheduled
            .lock()
            .expect("fake poisoned")
            .iter()
            .any(|j| j.job_id == job_id);
        if known {
            Ok(())
        } else {
            Err(BackendError::UnknownTask(job_id))
        }
    }
}

pub struct FixedDevice {
    charging: bool,
    network: NetworkState,
}

impl FixedDevice {
    pub fn new(charging: bool, network: NetworkState) -> Self {
        Self { charging, network }
    }
}

impl DeviceState for FixedDevice {
    fn is_charging(&self) -> bool {
        self.charging
    }

    fn network(&self) -> NetworkState {
        self.network
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    scheduled: Mutex<Vec<(TaskId, bool)>>,
    started: Mutex<Vec<TaskId>>,
    expired: Mutex<Vec<TaskId>>,
}

impl RecordingTelemetry {
    pub fn scheduled(&self) -> Vec<(TaskId, bool)> {
        snapshot(&self.scheduled)
    }

    pub fn started(&self) -> Vec<TaskId> {
        snapshot(&self.started)
    }

    pub fn expired(&self) -> Vec<TaskId> {
        snapshot(&self.expired)
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn report_task_scheduled(&self, task_id: TaskId, success: bool) {
        self.scheduled
            .lock()
            .expect("fake poisoned")
            .push((task_id, success));
    }

    fn report_task_started(&self, task_id: TaskId) {
        self.started.lock().expect("fake poisoned").push(task_id);
    }

    fn report_task_created_and_expiration_state(&self, _task_id: TaskId, _expires: bool) {}

    fn report_task_expired(&self, task_id: TaskId) {
        self.expired.lock().expect("fake poisoned").push(task_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started(TaskId),
    Stopped(TaskId),
    Rescheduled(TaskId),
}

/// Owner whose behaviour is fixed up front; every call is logged.
#[derive(Clone)]
pub struct ScriptedTask {
    pub log: Arc<Mutex<Vec<TaskEvent>>>,
    pub callbacks: Arc<Mutex<Vec<TaskFinishedCallback>>>,
    pub start_returns: bool,
    /// Call the callback from inside `on_start_task` with this value.
    pub finish_immediately: Option<bool>,
    pub stop_returns: bool,
    /// Call the running firing's callback from inside `on_stop_task`.
    pub finish_on_stop: Option<bool>,
    /// Submitted through the context on `reschedule`.
    pub resubmit: Option<TaskInfo>,
}

impl Default for ScriptedTask {
    fn default() -> Self {
        Self {
            log: Arc::default(),
            callbacks: Arc::default(),
            start_returns: true,
            finish_immediately: None,
            stop_returns: false,
            finish_on_stop: None,
            resubmit: None,
        }
    }
}

impl ScriptedTask {
    pub fn events(&self) -> Vec<TaskEvent> {
        snapshot(&self.log)
    }

    /// The callback handed to the most recent `on_start_task`.
    pub fn last_callback(&self) -> TaskFinishedCallback {
        self.callbacks
            .lock()
            .expect("fake poisoned")
            .last()
            .cloned()
            .expect("task was never started")
    }
}

impl BackgroundTask for ScriptedTask {
    fn on_start_task(
        &mut self,
        _ctx: &TaskContext<'_>,
        params: &TaskParameters,
        callback: TaskFinishedCallback,
    ) -> bool {
        self.log
            .lock()
            .expect("fake poisoned")
            .push(TaskEvent::Started(params.task_id));
        if let Some(needs_reschedule) = self.finish_immediately {
            callback.task_finished(needs_reschedule);
        }
        self.callbacks.lock().expect("fake poisoned").push(callback);
        self.start_returns
    }

    fn on_stop_task(&mut self, _ctx: &TaskContext<'_>, params: &TaskParameters) -> bool {
        self.log
            .lock()
            .expect("fake poisoned")
            .push(TaskEvent::Stopped(params.task_id));
        if let Some(needs_reschedule) = self.finish_on_stop {
            self.last_callback().task_finished(needs_reschedule);
        }
        self.stop_returns
    }

    fn reschedule(&mut self, ctx: &TaskContext<'_>) {
        let id = self
            .resubmit
            .as_ref()
            .map(TaskInfo::task_id)
            .unwrap_or(TaskId(-1));
        self.log
            .lock()
            .expect("fake poisoned")
            .push(TaskEvent::Rescheduled(id));
        if let Some(task) = &self.resubmit {
            ctx.scheduler().schedule(task);
        }
    }
}

/// Factory returning a fresh clone of a registered [`ScriptedTask`].
#[derive(Default)]
pub struct StaticFactory {
    tasks: HashMap<TaskId, ScriptedTask>,
}

impl StaticFactory {
    pub fn with(mut self, task_id: i32, task: ScriptedTask) -> Self {
        self.tasks.insert(TaskId(task_id), task);
        self
    }
}

impl BackgroundTaskFactory for StaticFactory {
    fn background_task(&self, task_id: TaskId) -> Option<Box<dyn BackgroundTask>> {
        self.tasks
            .get(&task_id)
            .cloned()
            .map(|t| Box::new(t) as Box<dyn BackgroundTask>)
    }
}

pub struct Harness {
    pub scheduler: Arc<BackgroundTaskScheduler>,
    pub registry: Arc<TaskRegistry>,
    pub alarms: Arc<RecordingAlarms>,
    pub legacy: Arc<RecordingLegacy>,
    pub jobs: Arc<RecordingJobs>,
    pub clock: Arc<ManualClock>,
    pub telemetry: Arc<RecordingTelemetry>,
}

pub fn harness(os_version: OsVersion, factory: StaticFactory) -> Harness {
    let registry = Arc::new(TaskRegistry::open_in_memory().expect("open registry"));
    harness_with_registry(registry, os_version, factory)
}

/// Build a scheduler over an existing registry, as a restarted process would.
pub fn harness_with_registry(
    registry: Arc<TaskRegistry>,
    os_version: OsVersion,
    factory: StaticFactory,
) -> Harness {
    let alarms = Arc::new(RecordingAlarms::default());
    let legacy = Arc::new(RecordingLegacy::available());
    let jobs = Arc::new(RecordingJobs::default());
    let clock = Arc::new(ManualClock::new(START_MS));
    let telemetry = Arc::new(RecordingTelemetry::default());
    let backends = Backends::new(alarms.clone(), legacy.clone(), jobs.clone());
    let scheduler = BackgroundTaskScheduler::builder(
        Arc::clone(&registry),
        backends,
        Arc::new(factory),
        os_version,
    )
    .policy(BackendPolicy::new(THRESHOLD))
    .clock(clock.clone())
    .telemetry(telemetry.clone())
    .build();
    Harness {
        scheduler: Arc::new(scheduler),
        registry,
        alarms,
        legacy,
        jobs,
        clock,
        telemetry,
    }
}
