use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::agent::endpoint::Pulse;
use crate::agent::registry::{Agent, AgentId, AgentRegistry};
use crate::monitor::cpr::CprSchedule;
use crate::scheduler::job::{JobId, JobSpec};
use crate::scheduler::matcher::{MatchOutcome, ResourceMatcher};
use crate::scheduler::registry::JobRegistry;

/// Polls every alive agent on a fixed interval.
///
/// A failed heartbeat moves the agent to `icu` and starts a recovery task
/// (see [`CprSchedule`]) without holding up the poll loop. Each cycle also
/// retries placement of every job still pending.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    pub(crate) agents: Arc<AgentRegistry>,
    pub(crate) jobs: Arc<JobRegistry>,
    matcher: ResourceMatcher,
    interval: Duration,
    pub(crate) cpr: CprSchedule,
    recoveries: TaskTracker,
}

impl HeartbeatMonitor {
    pub fn new(
        agents: Arc<AgentRegistry>,
        jobs: Arc<JobRegistry>,
        interval: Duration,
        cpr: CprSchedule,
    ) -> Self {
        Self {
            matcher: ResourceMatcher::new(agents.clone()),
            agents,
            jobs,
            interval,
            cpr,
            recoveries: TaskTracker::new(),
        }
    }

    /// Run poll cycles until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; agents get one full period first.
        interval.tick().await;

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Heartbeat monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Heartbeat monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.poll_cycle().await;
                }
            }
        }
    }

    /// One pass: heartbeat all alive agents, then retry pending jobs.
    pub async fn poll_cycle(&self) {
        let agents = self.agents.pollable().await;
        tracing::trace!(agents = agents.len(), "Polling agents");

        let mut checks = JoinSet::new();
        for agent in agents {
            let monitor = self.clone();
            checks.spawn(async move { monitor.check_agent(agent).await });
        }
        while let Some(result) = checks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Heartbeat check panicked");
            }
        }

        for (job_id, spec) in self.jobs.claim_pending().await {
            self.redeploy(job_id, &spec).await;
        }
    }

    async fn check_agent(&self, agent: Agent) {
        match agent.endpoint.heartbeat().await {
            Ok(pulse) => self.absorb(&agent.id, &pulse).await,
            Err(e) => {
                if !self.agents.admit_to_icu(&agent.id).await {
                    return;
                }
                tracing::warn!(agent_id = %agent.id, error = %e, "Heartbeat failed, agent moved to icu");

                let monitor = self.clone();
                self.recoveries.spawn(async move {
                    monitor.resuscitate(agent.id, agent.endpoint).await;
                });
            }
        }
    }

    /// Merge a heartbeat payload into both registries.
    pub(crate) async fn absorb(&self, agent_id: &AgentId, pulse: &Pulse) {
        if let Err(e) = self
            .agents
            .update_usage(agent_id, pulse.cpu_usage, pulse.memory_usage)
            .await
        {
            tracing::warn!(agent_id = %agent_id, error = %e, "Failed to record agent usage");
            return;
        }
        self.jobs.apply_report(agent_id, &pulse.jobs).await;
    }

    /// Run placement again for a job that is pending or lost its agent.
    pub async fn redeploy(&self, job_id: JobId, spec: &JobSpec) -> MatchOutcome {
        let outcome = self.matcher.match_and_place(job_id, spec).await;
        match self.jobs.record_outcome(&job_id, outcome).await {
            Ok(status) => {
                tracing::debug!(job_id = %job_id, status = %status, "Job redeployed");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to record redeploy outcome");
            }
        }
        outcome
    }

    /// Wait until every recovery task started so far has finished.
    pub async fn wait_for_recoveries(&self) {
        self.recoveries.close();
        self.recoveries.wait().await;
        self.recoveries.reopen();
    }

    pub fn recoveries_in_progress(&self) -> usize {
        self.recoveries.len()
    }
}
