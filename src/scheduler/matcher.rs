use std::sync::Arc;

use crate::agent::endpoint::AgentCallError;
use crate::agent::registry::{Agent, AgentId, AgentRegistry};
use crate::scheduler::job::{JobId, JobSpec};

/// Result of one placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Placed(AgentId),
    /// No qualified agent accepted the job. Not an error: the job waits.
    Pending,
    /// The job's image does not exist. Terminal for the job.
    ImageNotFound,
}

/// Order agents least loaded first: lowest memory usage, then lowest cpu usage.
pub fn rank_candidates(candidates: &mut [Agent]) {
    candidates.sort_by(|a, b| {
        a.memory_usage
            .total_cmp(&b.memory_usage)
            .then(a.cpu_usage.total_cmp(&b.cpu_usage))
    });
}

/// Greedy first-fit-by-load placement of jobs on agents.
///
/// Capacity is not reserved: two concurrent placements can pick the same agent
/// before its usage figures move.
#[derive(Clone)]
pub struct ResourceMatcher {
    agents: Arc<AgentRegistry>,
}

impl ResourceMatcher {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self { agents }
    }

    /// Find a qualified agent and have it accept the job.
    pub async fn match_and_place(&self, job_id: JobId, spec: &JobSpec) -> MatchOutcome {
        let mut candidates = self.agents.candidates(&spec.resource_requirement).await;
        if candidates.is_empty() {
            tracing::debug!(job_id = %job_id, "No agent qualifies for job");
            return MatchOutcome::Pending;
        }
        rank_candidates(&mut candidates);

        for agent in candidates {
            match agent.endpoint.submit_job(job_id, spec).await {
                Ok(true) => {
                    tracing::info!(job_id = %job_id, agent_id = %agent.id, "Job placed");
                    return MatchOutcome::Placed(agent.id);
                }
                Ok(false) => {
                    tracing::debug!(job_id = %job_id, agent_id = %agent.id, "Agent declined job");
                }
                Err(AgentCallError::ImageNotFound(image)) => {
                    tracing::warn!(job_id = %job_id, image = %image, "Image not found, aborting placement");
                    return MatchOutcome::ImageNotFound;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        agent_id = %agent.id,
                        error = %e,
                        "Submission failed, trying next agent"
                    );
                }
            }
        }

        MatchOutcome::Pending
    }
}
