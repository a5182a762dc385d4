use bts_core::TaskId;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::extras::{self, EncodedExtra, Extras};
use crate::types::{TaskInfo, TimingInfo};

/// Bundle handed to a one-off/periodic OS primitive and delivered back to the
/// deferred entry point when the task fires.
///
/// Besides the caller's extras it carries just enough scheduling metadata to
/// recompute the deadline window at dispatch time. All times are absolute
/// epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub task_id: TaskId,
    pub schedule_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end_time_ms: Option<i64>,
    #[serde(default)]
    pub expires_after_window_end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flex_ms: Option<i64>,
    #[serde(default)]
    pub extras: Vec<EncodedExtra>,
}

impl DeliveryPayload {
    /// Build the payload for a task scheduled at `schedule_time_ms`.
    /// Exact tasks have no deferred payload and yield `None`.
    pub fn for_task(task: &TaskInfo, schedule_time_ms: i64) -> Option<Self> {
        let mut payload = Self {
            task_id: task.task_id(),
            schedule_time_ms,
            window_start_time_ms: None,
            window_end_time_ms: None,
            expires_after_window_end: false,
            interval_ms: None,
            flex_ms: None,
            extras: extras::encode(task.extras()),
        };
        match *task.timing() {
            TimingInfo::OneOff {
                window_start_ms,
                window_end_ms,
                expires_after_window_end,
            } => {
                payload.window_start_time_ms =
                    Some(schedule_time_ms.saturating_add(window_start_ms.unwrap_or(0)));
                payload.window_end_time_ms = Some(schedule_time_ms.saturating_add(window_end_ms));
                payload.expires_after_window_end = expires_after_window_end;
            }
            TimingInfo::Periodic {
                interval_ms,
                flex_ms,
            } => {
                payload.interval_ms = Some(interval_ms);
                payload.flex_ms = flex_ms;
            }
            TimingInfo::Exact { .. } => return None,
        }
        Some(payload)
    }

    pub fn is_periodic(&self) -> bool {
        self.interval_ms.is_some()
    }

    pub fn decode_extras(&self) -> Result<Extras, CodecError> {
        extras::decode(&self.extras)
    }

    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::ExtraValue;

    #[test]
    fn one_off_window_becomes_absolute() {
        let task = TaskInfo::builder(3, TimingInfo::one_off_window(1_000, 5_000).expiring())
            .build()
            .expect("valid");
        let payload = DeliveryPayload::for_task(&task, 10_000).expect("deferred");
        assert_eq!(payload.window_start_time_ms, Some(11_000));
        assert_eq!(payload.window_end_time_ms, Some(15_000));
        assert!(payload.expires_after_window_end);
        assert!(!payload.is_periodic());
    }

    #[test]
    fn exact_has_no_deferred_payload() {
        let task = TaskInfo::builder(3, TimingInfo::exact(5)).build().expect("valid");
        assert!(DeliveryPayload::for_task(&task, 0).is_none());
    }

    #[test]
    fn extras_travel_inside_the_bundle() {
        let extras = Extras::new().with("n", ExtraValue::IntArray(vec![2, 1]));
        let task = TaskInfo::builder(8, TimingInfo::periodic(60_000, Some(5_000)))
            .extras(extras.clone())
            .build()
            .expect("valid");
        let json = DeliveryPayload::for_task(&task, 0)
            .expect("deferred")
            .to_json()
            .expect("json");
        let back = DeliveryPayload::from_json(&json).expect("parse");
        assert_eq!(back.interval_ms, Some(60_000));
        assert_eq!(back.decode_extras().expect("extras"), extras);
    }
}
