use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::endpoint::JobReport;
use crate::agent::registry::AgentId;
use crate::error::{MasterError, Result};
use crate::scheduler::job::{Job, JobId, JobSpec, JobStatus, JobSummary};
use crate::scheduler::matcher::MatchOutcome;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Owns every job record the master has accepted.
///
/// Records are never removed so ids are never recycled. The lock is only held
/// for map access; callers must not hold job data across remote calls.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
    max_jobs: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_jobs,
        }
    }

    /// Record a new pending job and return its id.
    ///
    /// The job starts claimed for placement: the caller is expected to run the
    /// initial placement and conclude it with [`assign`](Self::assign) or
    /// [`set_status`](Self::set_status).
    pub async fn create(&self, spec: JobSpec) -> Result<JobId> {
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_jobs {
            return Err(MasterError::RegistryFull);
        }

        let mut id = Uuid::new_v4();
        while jobs.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let mut job = Job::new(id, spec);
        job.placement_in_flight = true;
        jobs.insert(id, job);
        tracing::debug!(job_id = %id, "Job recorded");
        Ok(id)
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Record a placement: new agent, new status, restart count reset.
    pub async fn assign(&self, id: &JobId, agent_id: AgentId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or(MasterError::JobNotFound(*id))?;
        job.agent_id = Some(agent_id);
        job.status = status;
        job.restart_count = 0;
        job.placement_in_flight = false;
        Ok(())
    }

    /// Overwrite the status. Also concludes any placement in flight.
    pub async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or(MasterError::JobNotFound(*id))?;
        job.status = status;
        job.placement_in_flight = false;
        Ok(())
    }

    /// Conclude a placement attempt and return the job's resulting status.
    pub async fn record_outcome(&self, id: &JobId, outcome: MatchOutcome) -> Result<JobStatus> {
        let status = match outcome {
            MatchOutcome::Placed(agent_id) => {
                self.assign(id, agent_id, JobStatus::Deploying).await?;
                JobStatus::Deploying
            }
            MatchOutcome::Pending => {
                self.set_status(id, JobStatus::Pending).await?;
                JobStatus::Pending
            }
            MatchOutcome::ImageNotFound => {
                self.set_status(id, JobStatus::Fail).await?;
                JobStatus::Fail
            }
        };
        Ok(status)
    }

    pub async fn set_restart_count(&self, id: &JobId, restart_count: u32) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or(MasterError::JobNotFound(*id))?;
        job.restart_count = restart_count;
        Ok(())
    }

    /// Fail a pending job unless a placement is running for it.
    ///
    /// Returns false when the job is not pending or has been claimed.
    pub async fn fail_if_pending(&self, id: &JobId) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or(MasterError::JobNotFound(*id))?;
        if job.status != JobStatus::Pending || job.placement_in_flight {
            return Ok(false);
        }
        job.status = JobStatus::Fail;
        Ok(true)
    }

    /// Apply the job list of a heartbeat sent by `agent_id`.
    ///
    /// Only jobs currently assigned to that agent are touched, and statuses only
    /// move forward. Returns the number of jobs updated.
    pub async fn apply_report(&self, agent_id: &AgentId, reports: &[JobReport]) -> usize {
        let mut jobs = self.jobs.write().await;
        let mut updated = 0;

        for report in reports {
            let Some(job) = jobs.get_mut(&report.job_id) else {
                tracing::debug!(job_id = %report.job_id, agent_id = %agent_id, "Agent reported unknown job");
                continue;
            };
            if job.agent_id != Some(*agent_id) || job.placement_in_flight {
                continue;
            }

            if job.status.accepts_report(report.status) {
                if job.status != report.status {
                    tracing::debug!(
                        job_id = %job.id,
                        from = %job.status,
                        to = %report.status,
                        "Job status updated from heartbeat"
                    );
                }
                job.status = report.status;
            }
            job.restart_count = report.restart_count;
            updated += 1;
        }

        updated
    }

    /// Claim every pending job that has no placement running.
    pub async fn claim_pending(&self) -> Vec<(JobId, JobSpec)> {
        let mut jobs = self.jobs.write().await;
        jobs.values_mut()
            .filter(|j| j.status == JobStatus::Pending && !j.placement_in_flight)
            .map(|j| {
                j.placement_in_flight = true;
                (j.id, j.spec.clone())
            })
            .collect()
    }

    /// Claim every unfinished job still pointing at `agent_id`.
    pub async fn claim_orphans(&self, agent_id: &AgentId) -> Vec<(JobId, JobSpec)> {
        let mut jobs = self.jobs.write().await;
        jobs.values_mut()
            .filter(|j| {
                j.agent_id == Some(*agent_id) && !j.status.is_terminal() && !j.placement_in_flight
            })
            .map(|j| {
                j.placement_in_flight = true;
                (j.id, j.spec.clone())
            })
            .collect()
    }

    /// Summaries of all jobs, oldest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        self.all_jobs().await.iter().map(Job::summary).collect()
    }

    /// Snapshot of all jobs sorted chronologically by creation time
    pub async fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn jobs_for_agent(&self, agent_id: &AgentId) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.agent_id == Some(*agent_id))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
