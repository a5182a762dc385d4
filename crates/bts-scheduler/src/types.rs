use bts_core::TaskId;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, TaskInfoError};
use crate::extras::{self, EncodedExtra, Extras};

/// Defines when a task should run.
///
/// One-off window offsets are relative to the moment the task is scheduled;
/// exact trigger times are absolute epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingInfo {
    /// Run once, somewhere inside `[window_start_ms, window_end_ms)`.
    OneOff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_start_ms: Option<i64>,
        window_end_ms: i64,
        /// Let the OS miss the window instead of forcing a run at its end.
        #[serde(default)]
        expires_after_window_end: bool,
    },

    /// Run once per interval, in the last `flex_ms` of each period.
    Periodic {
        interval_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flex_ms: Option<i64>,
    },

    /// Fire at an exact wall-clock instant.
    Exact { trigger_at_ms: i64 },
}

impl TimingInfo {
    pub fn one_off(window_end_ms: i64) -> Self {
        TimingInfo::OneOff {
            window_start_ms: None,
            window_end_ms,
            expires_after_window_end: false,
        }
    }

    pub fn one_off_window(window_start_ms: i64, window_end_ms: i64) -> Self {
        TimingInfo::OneOff {
            window_start_ms: Some(window_start_ms),
            window_end_ms,
            expires_after_window_end: false,
        }
    }

    pub fn periodic(interval_ms: i64, flex_ms: Option<i64>) -> Self {
        TimingInfo::Periodic {
            interval_ms,
            flex_ms,
        }
    }

    pub fn exact(trigger_at_ms: i64) -> Self {
        TimingInfo::Exact { trigger_at_ms }
    }

    /// Mark a one-off window as expiring. No effect on other variants.
    pub fn expiring(mut self) -> Self {
        if let TimingInfo::OneOff {
            expires_after_window_end,
            ..
        } = &mut self
        {
            *expires_after_window_end = true;
        }
        self
    }

    pub fn kind(&self) -> TimingKind {
        match self {
            TimingInfo::OneOff { .. } => TimingKind::OneOff,
            TimingInfo::Periodic { .. } => TimingKind::Periodic,
            TimingInfo::Exact { .. } => TimingKind::Exact,
        }
    }

    pub fn expires(&self) -> bool {
        matches!(
            self,
            TimingInfo::OneOff {
                expires_after_window_end: true,
                ..
            }
        )
    }

    pub fn validate(&self) -> Result<(), TaskInfoError> {
        match *self {
            TimingInfo::OneOff {
                window_start_ms,
                window_end_ms,
                ..
            } => {
                if window_end_ms < 0 || window_start_ms.is_some_and(|s| s < 0) {
                    return Err(TaskInfoError::NegativeWindow);
                }
                if let Some(start_ms) = window_start_ms {
                    if window_end_ms <= start_ms {
                        return Err(TaskInfoError::EmptyWindow {
                            start_ms,
                            end_ms: window_end_ms,
                        });
                    }
                }
                Ok(())
            }
            TimingInfo::Periodic {
                interval_ms,
                flex_ms,
            } => {
                if interval_ms <= 0 {
                    return Err(TaskInfoError::InvalidInterval(interval_ms));
                }
                match flex_ms {
                    Some(flex_ms) if !(0..=interval_ms).contains(&flex_ms) => {
                        Err(TaskInfoError::InvalidFlex {
                            interval_ms,
                            flex_ms,
                        })
                    }
                    _ => Ok(()),
                }
            }
            TimingInfo::Exact { trigger_at_ms } => {
                if trigger_at_ms < 0 {
                    Err(TaskInfoError::NegativeTrigger(trigger_at_ms))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Timing variant without its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingKind {
    OneOff,
    Periodic,
    Exact,
}

impl std::fmt::Display for TimingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimingKind::OneOff => "one_off",
            TimingKind::Periodic => "periodic",
            TimingKind::Exact => "exact",
        };
        write!(f, "{s}")
    }
}

/// Network connectivity a task needs before it may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    #[default]
    None,
    Any,
    Unmetered,
}

/// Device conditions a task needs before it may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub requires_charging: bool,
    #[serde(default)]
    pub required_network: NetworkType,
}

/// Full description of one unit of deferred work. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    task_id: TaskId,
    timing: TimingInfo,
    constraints: Constraints,
    extras: Extras,
    persisted: bool,
}

impl TaskInfo {
    pub fn builder(task_id: impl Into<TaskId>, timing: TimingInfo) -> TaskInfoBuilder {
        TaskInfoBuilder {
            task_id: task_id.into(),
            timing,
            constraints: Constraints::default(),
            extras: Extras::new(),
            persisted: false,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn timing(&self) -> &TimingInfo {
        &self.timing
    }

    pub fn constraints(&self) -> Constraints {
        self.constraints
    }

    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    /// Whether the registry keeps this task across a restart of the host.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Serialize into the document stored in the registry.
    pub fn encode(&self) -> Result<String, CodecError> {
        let stored = StoredTaskInfo {
            task_id: self.task_id,
            timing: self.timing.clone(),
            constraints: self.constraints,
            persisted: self.persisted,
            extras: extras::encode(&self.extras),
        };
        Ok(serde_json::to_string(&stored)?)
    }

    /// Rebuild a task from a registry document.
    pub fn decode(json: &str) -> Result<Self, CodecError> {
        let stored: StoredTaskInfo = serde_json::from_str(json)?;
        Ok(Self {
            task_id: stored.task_id,
            timing: stored.timing,
            constraints: stored.constraints,
            persisted: stored.persisted,
            extras: extras::decode(&stored.extras)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTaskInfo {
    task_id: TaskId,
    timing: TimingInfo,
    #[serde(default)]
    constraints: Constraints,
    #[serde(default)]
    persisted: bool,
    #[serde(default)]
    extras: Vec<EncodedExtra>,
}

/// Builder for [`TaskInfo`]; validation happens in [`TaskInfoBuilder::build`].
#[derive(Debug, Clone)]
pub struct TaskInfoBuilder {
    task_id: TaskId,
    timing: TimingInfo,
    constraints: Constraints,
    extras: Extras,
    persisted: bool,
}

impl TaskInfoBuilder {
    pub fn requires_charging(mut self, required: bool) -> Self {
        self.constraints.requires_charging = required;
        self
    }

    pub fn required_network(mut self, network: NetworkType) -> Self {
        self.constraints.required_network = network;
        self
    }

    pub fn extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    pub fn persisted(mut self, persisted: bool) -> Self {
        self.persisted = persisted;
        self
    }

    pub fn build(self) -> Result<TaskInfo, TaskInfoError> {
        self.timing.validate()?;
        Ok(TaskInfo {
            task_id: self.task_id,
            timing: self.timing,
            constraints: self.constraints,
            extras: self.extras,
            persisted: self.persisted,
        })
    }
}
