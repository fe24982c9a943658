//! The master's request-facing surface.
//!
//! [`Scheduler`] composes the registries, the matcher and the heartbeat
//! monitor. Transport layers (gRPC, dashboard) only talk to it.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::endpoint::{AgentCallError, AgentConnector};
use crate::agent::registry::{Agent, AgentDescriptor, AgentId, AgentRegistry};
use crate::config::MasterConfig;
use crate::error::{MasterError, Result};
use crate::monitor::{CprSchedule, HeartbeatMonitor};
use crate::scheduler::job::{Job, JobId, JobSpec, JobStatus, JobSummary};
use crate::scheduler::matcher::ResourceMatcher;
use crate::scheduler::registry::JobRegistry;

fn agent_error(job_id: JobId, err: AgentCallError) -> MasterError {
    match err {
        AgentCallError::JobUnknown(_) => MasterError::JobUnknownToAgent(job_id),
        AgentCallError::Unreachable(msg) => MasterError::AgentUnreachable(msg),
        AgentCallError::ImageNotFound(image) => MasterError::ImageNotFound(image),
        AgentCallError::Fault(msg) => MasterError::AgentFault(msg),
    }
}

pub struct Scheduler {
    agents: Arc<AgentRegistry>,
    jobs: Arc<JobRegistry>,
    matcher: ResourceMatcher,
    monitor: HeartbeatMonitor,
}

impl Scheduler {
    pub fn new(config: &MasterConfig, connector: Arc<dyn AgentConnector>) -> Self {
        Self::with_schedule(
            connector,
            config.max_jobs,
            config.heartbeat_interval(),
            CprSchedule::from_millis(&config.cpr_backoff_ms),
        )
    }

    pub fn with_schedule(
        connector: Arc<dyn AgentConnector>,
        max_jobs: usize,
        heartbeat_interval: Duration,
        cpr: CprSchedule,
    ) -> Self {
        let agents = Arc::new(AgentRegistry::new(connector));
        let jobs = Arc::new(JobRegistry::with_capacity(max_jobs));
        let monitor =
            HeartbeatMonitor::new(agents.clone(), jobs.clone(), heartbeat_interval, cpr);

        Self {
            matcher: ResourceMatcher::new(agents.clone()),
            agents,
            jobs,
            monitor,
        }
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    /// Handle to the heartbeat monitor sharing this scheduler's registries.
    pub fn monitor(&self) -> HeartbeatMonitor {
        self.monitor.clone()
    }

    /// Accept a job and try to place it right away.
    ///
    /// The id is returned whatever the placement outcome; the job is left
    /// `deploying`, `pending` or `fail`.
    pub async fn submit_job(&self, spec: JobSpec) -> Result<JobId> {
        spec.validate()?;
        let job_id = self.jobs.create(spec.clone()).await?;

        // Placement runs detached so a dropped request cannot leave the job claimed.
        let matcher = self.matcher.clone();
        let jobs = self.jobs.clone();
        let placement = tokio::spawn(async move {
            let outcome = matcher.match_and_place(job_id, &spec).await;
            jobs.record_outcome(&job_id, outcome).await
        });

        let status = match placement.await {
            Ok(recorded) => recorded?,
            Err(e) => {
                // Release the claim so the monitor retries the job.
                self.jobs.set_status(&job_id, JobStatus::Pending).await?;
                tracing::error!(job_id = %job_id, error = %e, "Placement task failed, job left pending");
                return Err(MasterError::Internal(format!("placement task failed: {}", e)));
            }
        };

        tracing::info!(job_id = %job_id, status = %status, "Job submitted");
        Ok(job_id)
    }

    pub async fn register_agent(&self, descriptor: AgentDescriptor) -> Result<AgentId> {
        self.agents.register(descriptor).await
    }

    pub async fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        Ok(self.get_job(job_id).await?.status)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.jobs
            .get(job_id)
            .await
            .ok_or(MasterError::JobNotFound(*job_id))
    }

    pub async fn list_jobs(&self) -> Vec<JobSummary> {
        self.jobs.list().await
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.agents.list().await
    }

    /// Kill a job on its agent.
    ///
    /// Finished jobs succeed without a remote call. A pending job is failed
    /// locally, unless a placement for it is running at that moment.
    pub async fn kill_job(&self, job_id: &JobId) -> Result<bool> {
        let mut job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Ok(true);
        }

        if job.status == JobStatus::Pending {
            if self.jobs.fail_if_pending(job_id).await? {
                tracing::info!(job_id = %job_id, "Pending job killed before placement");
                return Ok(true);
            }
            // A placement claimed the job meanwhile.
            job = self.get_job(job_id).await?;
            if job.status.is_terminal() {
                return Ok(true);
            }
        }

        let agent_id = match (job.status, job.agent_id) {
            (JobStatus::Pending, _) | (_, None) => return Err(MasterError::JobNotPlaced(*job_id)),
            (_, Some(agent_id)) => agent_id,
        };

        let agent = self
            .agents
            .get(&agent_id)
            .await
            .ok_or(MasterError::AgentNotFound(agent_id))?;

        let killed = agent
            .endpoint
            .kill_job(*job_id)
            .await
            .map_err(|e| agent_error(*job_id, e))?;
        tracing::info!(job_id = %job_id, agent_id = %agent_id, killed, "Kill forwarded to agent");
        Ok(killed)
    }

    /// Fetch the job's output from the agent running it.
    pub async fn request_output(&self, job_id: &JobId) -> Result<Vec<u8>> {
        let job = self.get_job(job_id).await?;
        let agent_id = job.agent_id.ok_or(MasterError::JobNotPlaced(*job_id))?;

        let agent = self
            .agents
            .get(&agent_id)
            .await
            .ok_or(MasterError::AgentNotFound(agent_id))?;

        agent
            .endpoint
            .fetch_output(*job_id)
            .await
            .map_err(|e| agent_error(*job_id, e))
    }
}
