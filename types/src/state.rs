//! Lifecycle states reported by the Cloud API.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provisioning state of any resource (`metadata.state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    Available,
    Busy,
    Inactive,
    Deploying,
    Destroying,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ResourceState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Busy => "BUSY",
            Self::Inactive => "INACTIVE",
            Self::Deploying => "DEPLOYING",
            Self::Destroying => "DESTROYING",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hypervisor state of a server (`properties.vmState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmState {
    Running,
    Shutoff,
    Shutdown,
    Crashed,
    Paused,
    Blocked,
    Nostate,
    #[serde(other)]
    Unknown,
}

impl VmState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Shutoff => "SHUTOFF",
            Self::Shutdown => "SHUTDOWN",
            Self::Crashed => "CRASHED",
            Self::Paused => "PAUSED",
            Self::Blocked => "BLOCKED",
            Self::Nostate => "NOSTATE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an asynchronous API request (`/requests/{id}/status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Queued,
    Running,
    Done,
    Failed,
    #[serde(other)]
    Unknown,
}

impl RequestStatus {
    /// `Done` and `Failed` end the request; everything else keeps polling.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}
