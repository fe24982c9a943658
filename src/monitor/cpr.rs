use std::sync::Arc;
use std::time::Duration;

use crate::agent::endpoint::AgentEndpoint;
use crate::agent::registry::{AgentId, AgentStatus};
use crate::monitor::heartbeat::HeartbeatMonitor;

/// Backoff delays tried, in order, against an unresponsive agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CprSchedule {
    delays: Vec<Duration>,
}

impl Default for CprSchedule {
    fn default() -> Self {
        Self::from_millis(&[10_000, 30_000, 60_000])
    }
}

impl CprSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self::new(delays_ms.iter().copied().map(Duration::from_millis).collect())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    /// Time from the failed poll to the death verdict if no attempt succeeds.
    pub fn total(&self) -> Duration {
        self.delays.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CprOutcome {
    /// Heartbeat came back on the given attempt (1-based).
    Revived { attempt: usize },
    Dead,
}

impl HeartbeatMonitor {
    /// Recovery sequence for an agent in `icu`.
    ///
    /// Sleeps each scheduled delay and retries the heartbeat. The first success
    /// restores the agent; exhausting the schedule marks it dead and moves its
    /// unfinished jobs elsewhere.
    pub async fn resuscitate(&self, agent_id: AgentId, endpoint: Arc<dyn AgentEndpoint>) -> CprOutcome {
        for (i, delay) in self.cpr.delays().iter().enumerate() {
            tokio::time::sleep(*delay).await;

            match endpoint.heartbeat().await {
                Ok(pulse) => {
                    self.absorb(&agent_id, &pulse).await;
                    if let Err(e) = self.agents.set_status(&agent_id, AgentStatus::Alive).await {
                        tracing::warn!(agent_id = %agent_id, error = %e, "Failed to revive agent");
                    }
                    tracing::info!(agent_id = %agent_id, attempt = i + 1, "Agent revived");
                    return CprOutcome::Revived { attempt: i + 1 };
                }
                Err(e) => {
                    tracing::debug!(
                        agent_id = %agent_id,
                        attempt = i + 1,
                        error = %e,
                        "Recovery heartbeat failed"
                    );
                }
            }
        }

        self.declare_dead(agent_id).await;
        CprOutcome::Dead
    }

    async fn declare_dead(&self, agent_id: AgentId) {
        if let Err(e) = self.agents.set_status(&agent_id, AgentStatus::Dead).await {
            tracing::warn!(agent_id = %agent_id, error = %e, "Failed to mark agent dead");
        }

        let orphans = self.jobs.claim_orphans(&agent_id).await;
        tracing::warn!(
            agent_id = %agent_id,
            orphaned_jobs = orphans.len(),
            "Agent declared dead, redeploying its jobs"
        );

        for (job_id, spec) in orphans {
            self.redeploy(job_id, &spec).await;
        }
    }
}
