//! Projection lifecycle states as stored in the `status` column.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProjectionError;

/// The control state of a projection.
///
/// `Idle` and `Running` are written by the runner itself; the other states
/// are requests written by an operator and acted upon at the runner's next
/// status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum ProjectionStatus {
    Idle,
    Running,
    Stopping,
    Resetting,
    Deleting,
    DeletingInclEmittedEvents,
}

impl ProjectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionStatus::Idle => "idle",
            ProjectionStatus::Running => "running",
            ProjectionStatus::Stopping => "stopping",
            ProjectionStatus::Resetting => "resetting",
            ProjectionStatus::Deleting => "deleting",
            ProjectionStatus::DeletingInclEmittedEvents => "deleting incl emitted events",
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

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ProjectionStatus::Idle),
            "running" => Ok(ProjectionStatus::Running),
            "stopping" => Ok(ProjectionStatus::Stopping),
            "resetting" => Ok(ProjectionStatus::Resetting),
            "deleting" => Ok(ProjectionStatus::Deleting),
            "deleting incl emitted events" => Ok(ProjectionStatus::DeletingInclEmittedEvents),
            other => Err(ProjectionError::UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for ProjectionStatus {
    type Error = ProjectionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProjectionStatus> for &'static str {
    fn from(status: ProjectionStatus) -> Self {
        status.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_stored_value() {
        for status in [
            ProjectionStatus::Idle,
            ProjectionStatus::Running,
            ProjectionStatus::Stopping,
            ProjectionStatus::Resetting,
            ProjectionStatus::Deleting,
            ProjectionStatus::DeletingInclEmittedEvents,
        ] {
            assert_eq!(status.as_str().parse::<ProjectionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn rejects_unknown_value() {
        assert!(matches!(
            "paused".parse::<ProjectionStatus>(),
            Err(ProjectionError::UnknownStatus(_))
        ));
    }

    #[test]
    fn serializes_as_stored_string() {
        let json = serde_json::to_string(&ProjectionStatus::DeletingInclEmittedEvents).unwrap();
        assert_eq!(json, "\"deleting incl emitted events\"");
    }
}
