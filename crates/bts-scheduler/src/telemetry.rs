use bts_core::{OsVersion, TaskId};
use tracing::info;

/// Fire-and-forget sink for scheduling metrics.
///
/// Implementations must return quickly; the scheduler calls them inline and
/// never looks at the outcome.
pub trait TelemetrySink: Send + Sync {
    fn report_task_scheduled(&self, task_id: TaskId, success: bool);
    fn report_task_started(&self, task_id: TaskId);
    fn report_task_created_and_expiration_state(&self, task_id: TaskId, expires: bool);

    fn report_task_canceled(&self, _task_id: TaskId) {}
    fn report_task_stopped(&self, _task_id: TaskId) {}
    fn report_task_expired(&self, _task_id: TaskId) {}
    fn report_os_upgrade(&self, _from: Option<OsVersion>, _to: OsVersion) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn report_task_scheduled(&self, _task_id: TaskId, _success: bool) {}
    fn report_task_started(&self, _task_id: TaskId) {}
    fn report_task_created_and_expiration_state(&self, _task_id: TaskId, _expires: bool) {}
}

/// Emits every event as a structured log line under `bts::telemetry`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn report_task_scheduled(&self, task_id: TaskId, success: bool) {
        info!(target: "bts::telemetry", %task_id, success, "task scheduled");
    }

    fn report_task_started(&self, task_id: TaskId) {
        info!(target: "bts::telemetry", %task_id, "task started");
    }

    fn report_task_created_and_expiration_state(&self, task_id: TaskId, expires: bool) {
        info!(target: "bts::telemetry", %task_id, expires, "task created");
    }

    fn report_task_canceled(&self, task_id: TaskId) {
        info!(target: "bts::telemetry", %task_id, "task canceled");
    }

    fn report_task_stopped(&self, task_id: TaskId) {
        info!(target: "bts::telemetry", %task_id, "task stopped");
    }

    fn report_task_expired(&self, task_id: TaskId) {
        info!(target: "bts::telemetry", %task_id, "task expired");
    }

    fn report_os_upgrade(&self, from: Option<OsVersion>, to: OsVersion) {
        info!(target: "bts::telemetry", from = ?from.map(|v| v.0), %to, "os upgrade observed");
    }
}
