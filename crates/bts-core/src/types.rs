use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-chosen identifier of a background task.
///
/// Ids come from a fixed table owned by the embedding application; at most
/// one task per id is outstanding at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i32);

impl TaskId {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for TaskId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Platform API level of the host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OsVersion(pub u32);

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for OsVersion {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_parses_with_whitespace() {
        let id: TaskId = " 42 ".parse().expect("parse failed");
        assert_eq!(id, TaskId(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn task_id_serializes_as_bare_integer() {
        let json = serde_json::to_string(&TaskId(7)).expect("serialize");
        assert_eq!(json, "7");
    }

    #[test]
    fn os_versions_order_numerically() {
        assert!(OsVersion(22) < OsVersion(23));
    }
}
