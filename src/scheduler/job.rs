use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MasterError, Result};

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// No agent assigned, or waiting for a redeploy.
    Pending,
    Deploying,
    Running,
    End,
    Fail,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::End | JobStatus::Fail)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Deploying => 1,
            JobStatus::Running => 2,
            JobStatus::End | JobStatus::Fail => 3,
        }
    }

    /// Whether an agent report may move a job from `self` to `next`.
    ///
    /// Reports only move forward along `pending -> deploying -> running -> end|fail`
    /// and never leave a terminal status.
    pub fn accepts_report(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Deploying => write!(f, "deploying"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::End => write!(f, "end"),
            JobStatus::Fail => write!(f, "fail"),
        }
    }
}

/// CPU cores and memory in gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: u32,
    pub memory: f64,
}

impl Resources {
    pub fn new(cpu: u32, memory: f64) -> Self {
        Self { cpu, memory }
    }

    /// True when this capacity is at least `requirement` on both axes.
    pub fn covers(&self, requirement: &Resources) -> bool {
        self.cpu >= requirement.cpu && self.memory >= requirement.memory
    }
}

/// Job description as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(alias = "image_url")]
    pub image: String,
    pub resource_requirement: Resources,
    pub resource_limit: Resources,
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub restart_times: Option<u32>,
}

impl JobSpec {
    pub fn new(image: impl Into<String>, requirement: Resources, limit: Resources) -> Self {
        Self {
            image: image.into(),
            resource_requirement: requirement,
            resource_limit: limit,
            restart: false,
            restart_times: None,
        }
    }

    pub fn with_restart(mut self, restart_times: u32) -> Self {
        self.restart = true;
        self.restart_times = Some(restart_times);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(MasterError::InvalidJobDescriptor(
                "image cannot be empty".to_string(),
            ));
        }

        let req = &self.resource_requirement;
        if req.cpu == 0 || !req.memory.is_finite() || req.memory <= 0.0 {
            return Err(MasterError::InvalidJobDescriptor(
                "resource_requirement must request positive cpu and memory".to_string(),
            ));
        }

        let limit = &self.resource_limit;
        if !limit.memory.is_finite() || !limit.covers(req) {
            return Err(MasterError::InvalidJobDescriptor(
                "resource_limit must be at least resource_requirement".to_string(),
            ));
        }

        if self.restart && !matches!(self.restart_times, Some(n) if n > 0) {
            return Err(MasterError::InvalidJobDescriptor(
                "restart_times must be a positive integer when restart is set".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Agent currently (or last) responsible for the job. Never owning.
    pub agent_id: Option<Uuid>,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    /// Set while a placement attempt for this job is running.
    #[serde(skip)]
    pub(crate) placement_in_flight: bool,
}

impl Job {
    pub fn new(id: JobId, spec: JobSpec) -> Self {
        Self {
            id,
            spec,
            status: JobStatus::Pending,
            agent_id: None,
            restart_count: 0,
            created_at: Utc::now(),
            placement_in_flight: false,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            restart_count: self.restart_count,
        }
    }

    pub fn is_placement_in_flight(&self) -> bool {
        self.placement_in_flight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub restart_count: u32,
}
