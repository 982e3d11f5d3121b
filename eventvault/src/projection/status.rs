use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ProjectionError;

/// Lifecycle status stored in a projection row.
///
/// `Stopping`, `Resetting` and the two deleting states are commands written
/// by a manager; a running projector polls for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectionStatus {
    /// Not running.
    #[serde(rename = "idle")]
    Idle,
    /// Holding the lock and processing.
    #[serde(rename = "running")]
    Running,
    /// Stop requested.
    #[serde(rename = "stopping")]
    Stopping,
    /// Reset requested.
    #[serde(rename = "resetting")]
    Resetting,
    /// Deletion requested, emitted events kept.
    #[serde(rename = "deleting")]
    Deleting,
    /// Deletion requested, emitted events removed too.
    #[serde(rename = "deleting incl emitted events")]
    DeletingInclEmittedEvents,
}

impl ProjectionStatus {
    /// The string stored in the projection row.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Resetting => "resetting",
            Self::Deleting => "deleting",
            Self::DeletingInclEmittedEvents => "deleting incl emitted events",
        }
    }
}

impl fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionStatus {
    type Err = ProjectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "resetting" => Ok(Self::Resetting),
            "deleting" => Ok(Self::Deleting),
            "deleting incl emitted events" => Ok(Self::DeletingInclEmittedEvents),
            other => Err(ProjectionError::Internal(format!(
                "unknown projection status {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_roundtrip_through_strings() {
        for status in [
            ProjectionStatus::Idle,
            ProjectionStatus::Running,
            ProjectionStatus::Stopping,
            ProjectionStatus::Resetting,
            ProjectionStatus::Deleting,
            ProjectionStatus::DeletingInclEmittedEvents,
        ] {
            assert_eq!(status.as_str().parse::<ProjectionStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::from(status.as_str())
            );
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("paused".parse::<ProjectionStatus>().is_err());
    }
}
