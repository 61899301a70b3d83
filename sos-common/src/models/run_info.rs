//! Per-provider run and harvest metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// In progress; never persisted
    Running,
    Success,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Success => "Success",
            RunStatus::Failed => "Failed",
            RunStatus::Canceled => "Canceled",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "Running" => Ok(RunStatus::Running),
            "Success" => Ok(RunStatus::Success),
            "Failed" => Ok(RunStatus::Failed),
            "Canceled" => Ok(RunStatus::Canceled),
            other => Err(crate::Error::InvalidInput(format!("unknown run status: {}", other))),
        }
    }
}

/// Metadata of one provider's processing run
///
/// Created when the run starts, updated only by the owning run and
/// persisted once it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub data_provider_id: i32,
    /// Generation the run wrote to
    pub instance: Instance,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Processed observations written
    pub count: u64,
    /// Verbatim records rejected by validation
    pub invalid_count: u64,
    /// Failure description for `Failed` runs
    pub message: Option<String>,
}

impl RunInfo {
    pub fn start(run_id: Uuid, data_provider_id: i32, instance: Instance) -> Self {
        Self {
            run_id,
            data_provider_id,
            instance,
            start: Utc::now(),
            end: None,
            status: RunStatus::Running,
            count: 0,
            invalid_count: 0,
            message: None,
        }
    }

    /// Move to a terminal status and stamp the end time
    pub fn finish(&mut self, status: RunStatus, count: u64, invalid_count: u64) {
        self.status = status;
        self.count = count;
        self.invalid_count = invalid_count;
        self.end = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>, count: u64, invalid_count: u64) {
        self.message = Some(message.into());
        self.finish(RunStatus::Failed, count, invalid_count);
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Harvester's metadata for the verbatim data of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestInfo {
    pub data_provider_id: i32,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub count: u64,
}
