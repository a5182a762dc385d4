use std::sync::{Arc, Mutex, PoisonError};

use bts_core::TaskId;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::registry::TaskRegistry;
use crate::task::{BackgroundTask, TaskParameters};

/// OS-level result of a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    Reschedule,
    Failure,
}

impl TaskResult {
    pub fn from_needs_reschedule(needs_reschedule: bool) -> Self {
        if needs_reschedule {
            TaskResult::Reschedule
        } else {
            TaskResult::Success
        }
    }
}

/// Firings currently owned by an entry point, keyed by task id.
pub(crate) type InFlight = DashMap<TaskId, Arc<Firing>>;

/// One invocation of a task by the OS.
pub(crate) struct Firing {
    pub(crate) firing_id: Uuid,
    pub(crate) params: TaskParameters,
    /// Registration current when the firing began; `None` if the task was
    /// no longer in the registry.
    registration_id: Option<Uuid>,
    /// One-off and exact firings consume their registry record.
    removes_record: bool,
    registry: Arc<TaskRegistry>,
    in_flight: Arc<InFlight>,
    slot: Mutex<Slot>,
}

struct Slot {
    reply: Option<oneshot::Sender<TaskResult>>,
    owner: Option<Box<dyn BackgroundTask>>,
    outcome: Option<TaskResult>,
}

impl Firing {
    pub(crate) fn new(
        params: TaskParameters,
        registration_id: Option<Uuid>,
        removes_record: bool,
        registry: Arc<TaskRegistry>,
        in_flight: Arc<InFlight>,
    ) -> (Arc<Self>, Completion) {
        let (tx, rx) = oneshot::channel();
        let task_id = params.task_id;
        let firing = Arc::new(Self {
            firing_id: Uuid::now_v7(),
            params,
            registration_id,
            removes_record,
            registry,
            in_flight,
            slot: Mutex::new(Slot {
                reply: Some(tx),
                owner: None,
                outcome: None,
            }),
        });
        (
            firing,
            Completion {
                task_id,
                rx,
                result: None,
            },
        )
    }

    pub(crate) fn task_id(&self) -> TaskId {
        self.params.task_id
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        // The slot only holds Options; a poisoned guard is still consistent.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep the owner for a later stop request, unless the firing already
    /// finished (in which case the owner is dropped here).
    pub(crate) fn park_owner(&self, owner: Box<dyn BackgroundTask>) {
        let mut slot = self.slot();
        if slot.reply.is_some() {
            slot.owner = Some(owner);
        }
    }

    /// `None` once the firing has finished.
    pub(crate) fn take_owner(&self) -> Option<Box<dyn BackgroundTask>> {
        let mut slot = self.slot();
        if slot.reply.is_some() {
            slot.owner.take()
        } else {
            None
        }
    }

    /// The result the firing was resolved with, once it has been.
    pub(crate) fn outcome(&self) -> Option<TaskResult> {
        self.slot().outcome
    }

    /// Resolve the firing. The first call wins; returns whether this call did.
    pub(crate) fn finish(&self, result: TaskResult) -> bool {
        let (reply, owner) = {
            let mut slot = self.slot();
            let Some(reply) = slot.reply.take() else {
                debug!(
                    task_id = %self.task_id(),
                    firing_id = %self.firing_id,
                    "firing already finished; ignoring"
                );
                return false;
            };
            slot.outcome = Some(result);
            (reply, slot.owner.take())
        };
        drop(owner);

        self.in_flight
            .remove_if(&self.task_id(), |_, f| f.firing_id == self.firing_id);

        if let (true, Some(registration_id)) = (self.removes_record, self.registration_id) {
            // Compare-and-remove: a registration made after this firing began
            // (by the owner or anyone else) stays.
            match self
                .registry
                .remove_if_registration(self.task_id(), registration_id)
            {
                Ok(removed) => debug!(task_id = %self.task_id(), removed, "firing consumed record"),
                Err(e) => warn!(task_id = %self.task_id(), "failed to remove finished task: {e}"),
            }
        }

        debug!(task_id = %self.task_id(), firing_id = %self.firing_id, ?result, "firing finished");
        let _ = reply.send(result);
        true
    }
}

/// One-shot completion handle passed to `on_start_task`.
///
/// May be cloned and called from any thread, at any time. Only the first
/// call across all clones has an effect.
#[derive(Clone)]
pub struct TaskFinishedCallback {
    firing: Arc<Firing>,
}

impl TaskFinishedCallback {
    pub(crate) fn new(firing: Arc<Firing>) -> Self {
        Self { firing }
    }

    pub fn task_finished(&self, needs_reschedule: bool) {
        self.firing
            .finish(TaskResult::from_needs_reschedule(needs_reschedule));
    }

    pub fn task_id(&self) -> TaskId {
        self.firing.task_id()
    }
}

impl std::fmt::Debug for TaskFinishedCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFinishedCallback")
            .field("task_id", &self.firing.task_id())
            .field("firing_id", &self.firing.firing_id)
            .finish()
    }
}

/// OS-facing side of a running firing.
#[derive(Debug)]
pub struct Completion {
    task_id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
    result: Option<TaskResult>,
}

impl Completion {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Block until the firing finishes. Must not be called from async code.
    pub fn wait(self) -> TaskResult {
        if let Some(result) = self.result {
            return result;
        }
        self.rx.blocking_recv().unwrap_or(TaskResult::Failure)
    }

    pub async fn finished(self) -> TaskResult {
        if let Some(result) = self.result {
            return result;
        }
        self.rx.await.unwrap_or(TaskResult::Failure)
    }

    /// Non-blocking poll; `None` while the owner is still working.
    pub fn try_result(&mut self) -> Option<TaskResult> {
        if self.result.is_none() {
            self.result = match self.rx.try_recv() {
                Ok(result) => Some(result),
                Err(oneshot::error::TryRecvError::Empty) => None,
                // Sender dropped without a verdict.
                Err(oneshot::error::TryRecvError::Closed) => Some(TaskResult::Failure),
            };
        }
        self.result
    }
}
