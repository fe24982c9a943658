use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::scheduler::job::{JobId, JobSpec, JobStatus};

/// Version of the agent contract this master speaks.
pub const AGENT_CONTRACT_VERSION: u32 = 1;

/// Operations an agent must implement to be accepted.
pub const REQUIRED_OPERATIONS: [&str; 4] = ["submit_job", "heartbeat", "fetch_output", "kill_job"];

/// Failure of a single call to an agent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentCallError {
    /// The job's image does not exist. A property of the job, not of the agent.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("job unknown to agent: {0}")]
    JobUnknown(String),

    /// The agent answered with an error.
    #[error("agent fault: {0}")]
    Fault(String),

    /// Connection or protocol failure.
    #[error("agent unreachable: {0}")]
    Unreachable(String),
}

/// Status of one job as reported by its agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub restart_count: u32,
}

/// Heartbeat payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pulse {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub jobs: Vec<JobReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub operations: HashSet<String>,
    pub contract_version: u32,
}

impl Capabilities {
    /// Required operations the agent does not implement.
    pub fn missing_operations(&self) -> Vec<&'static str> {
        REQUIRED_OPERATIONS
            .iter()
            .copied()
            .filter(|op| !self.operations.contains(*op))
            .collect()
    }
}

/// Remote handle to one worker agent.
#[tonic::async_trait]
pub trait AgentEndpoint: Send + Sync {
    /// Ask the agent to run `job_id`. `Ok(false)` means the agent declined.
    async fn submit_job(&self, job_id: JobId, spec: &JobSpec) -> Result<bool, AgentCallError>;

    async fn heartbeat(&self) -> Result<Pulse, AgentCallError>;

    async fn fetch_output(&self, job_id: JobId) -> Result<Vec<u8>, AgentCallError>;

    async fn kill_job(&self, job_id: JobId) -> Result<bool, AgentCallError>;

    /// Only used at registration time.
    async fn probe_capabilities(&self) -> Result<Capabilities, AgentCallError>;
}

/// Opens an [`AgentEndpoint`] for a registration URL.
#[tonic::async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn AgentEndpoint>, AgentCallError>;
}
