//! Machine-readable record of one probe run.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use dcprobe_types::DatacenterId;
use dcprobe_utils::atomic_write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    CreateDatacenter,
    FrontendRunning,
    ResizeFrontend,
    FileTransfer,
    Teardown,
}

impl StepName {
    /// Scenario steps in execution order. Teardown is not one of them.
    pub const SCENARIO: [Self; 4] = [
        Self::CreateDatacenter,
        Self::FrontendRunning,
        Self::ResizeFrontend,
        Self::FileTransfer,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateDatacenter => "create-datacenter",
            Self::FrontendRunning => "frontend-running",
            Self::ResizeFrontend => "resize-frontend",
            Self::FileTransfer => "file-transfer",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    /// Not run because an earlier step failed.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: StepName,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub datacenter_id: Option<DatacenterId>,
    pub steps: Vec<StepReport>,
    pub teardown: Option<StepReport>,
}

impl Default for ProbeReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeReport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            datacenter_id: None,
            steps: Vec::new(),
            teardown: None,
        }
    }

    pub fn record_passed(&mut self, name: StepName, duration: Duration, detail: impl Into<String>) {
        self.push(StepReport {
            name,
            status: StepStatus::Passed,
            duration_ms: millis(duration),
            detail: detail.into(),
        });
    }

    pub fn record_failed(&mut self, name: StepName, duration: Duration, detail: impl Into<String>) {
        self.push(StepReport {
            name,
            status: StepStatus::Failed,
            duration_ms: millis(duration),
            detail: detail.into(),
        });
    }

    pub fn record_skipped(&mut self, name: StepName) {
        self.push(StepReport {
            name,
            status: StepStatus::Skipped,
            duration_ms: 0,
            detail: String::new(),
        });
    }

    fn push(&mut self, step: StepReport) {
        if step.name == StepName::Teardown {
            self.teardown = Some(step);
        } else {
            self.steps.push(step);
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Every scenario step ran and passed. Teardown does not count.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.steps.len() == StepName::SCENARIO.len()
            && self.steps.iter().all(|s| s.status == StepStatus::Passed)
    }

    #[must_use]
    pub fn step(&self, name: StepName) -> Option<&StepReport> {
        if name == StepName::Teardown {
            return self.teardown.as_ref();
        }
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON, replacing `path` atomically.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(io::Error::other)?;
        atomic_write(path, json.as_bytes())
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} started {}", self.run_id, self.started_at.to_rfc3339())?;
        if let Some(id) = &self.datacenter_id {
            writeln!(f, "datacenter {id}")?;
        }
        for step in self.steps.iter().chain(self.teardown.as_ref()) {
            let status = match step.status {
                StepStatus::Passed => "PASS",
                StepStatus::Failed => "FAIL",
                StepStatus::Skipped => "SKIP",
            };
            write!(f, "  {status} {:<18} {:>8}ms", step.name.as_str(), step.duration_ms)?;
            if step.detail.is_empty() {
                writeln!(f)?;
            } else {
                writeln!(f, "  {}", step.detail)?;
            }
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
