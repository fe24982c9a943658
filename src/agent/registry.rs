use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::endpoint::{AgentConnector, AgentEndpoint, AGENT_CONTRACT_VERSION};
use crate::error::{MasterError, Result};
use crate::scheduler::job::Resources;

pub type AgentId = Uuid;

/// Usage assigned to a freshly registered agent so idle agents still order
/// deterministically.
pub const INITIAL_USAGE: f64 = 0.01;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:http|ftp)s?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
    )
    .expect("agent url pattern is valid")
});

pub fn is_valid_url(url: &str) -> bool {
    URL_PATTERN.is_match(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Alive,
    /// Heartbeat failing, recovery in progress.
    Icu,
    /// Recovery exhausted. Terminal.
    Dead,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Alive => write!(f, "alive"),
            AgentStatus::Icu => write!(f, "icu"),
            AgentStatus::Dead => write!(f, "dead"),
        }
    }
}

/// What an agent declares about itself when registering.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDescriptor {
    pub url: String,
    pub cpu: u32,
    /// Gigabytes
    pub memory: f64,
}

impl AgentDescriptor {
    pub fn new(url: impl Into<String>, cpu: u32, memory: f64) -> Self {
        Self {
            url: url.into(),
            cpu,
            memory,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cpu == 0 {
            return Err(MasterError::InvalidAgentDescriptor(
                "cpu must be positive".to_string(),
            ));
        }
        if !self.memory.is_finite() || self.memory <= 0.0 {
            return Err(MasterError::InvalidAgentDescriptor(
                "memory must be positive".to_string(),
            ));
        }
        if !is_valid_url(&self.url) {
            return Err(MasterError::InvalidAgentDescriptor(format!(
                "malformed url: {}",
                self.url
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Serialize)]
pub struct Agent {
    pub id: AgentId,
    pub url: String,
    pub status: AgentStatus,
    pub capacity: Resources,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub registered_at: DateTime<Utc>,
    #[serde(skip)]
    pub endpoint: Arc<dyn AgentEndpoint>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("capacity", &self.capacity)
            .field("cpu_usage", &self.cpu_usage)
            .field("memory_usage", &self.memory_usage)
            .finish_non_exhaustive()
    }
}

/// Owns every agent the master has accepted. Records are never removed.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Agent>>,
    connector: Arc<dyn AgentConnector>,
}

impl AgentRegistry {
    pub fn new(connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            connector,
        }
    }

    /// Validate, connect, probe, then record the agent as alive.
    pub async fn register(&self, descriptor: AgentDescriptor) -> Result<AgentId> {
        descriptor.validate()?;

        let endpoint = self
            .connector
            .connect(&descriptor.url)
            .await
            .map_err(|e| MasterError::IncompatibleAgent(e.to_string()))?;

        let capabilities = endpoint
            .probe_capabilities()
            .await
            .map_err(|e| MasterError::IncompatibleAgent(e.to_string()))?;
        if capabilities.contract_version != AGENT_CONTRACT_VERSION {
            return Err(MasterError::IncompatibleAgent(format!(
                "contract version {} (expected {})",
                capabilities.contract_version, AGENT_CONTRACT_VERSION
            )));
        }
        let missing = capabilities.missing_operations();
        if !missing.is_empty() {
            return Err(MasterError::IncompatibleAgent(format!(
                "missing operations: {}",
                missing.join(", ")
            )));
        }

        let mut agents = self.agents.write().await;
        let mut id = Uuid::new_v4();
        while agents.contains_key(&id) {
            id = Uuid::new_v4();
        }

        agents.insert(
            id,
            Agent {
                id,
                url: descriptor.url.clone(),
                status: AgentStatus::Alive,
                capacity: Resources::new(descriptor.cpu, descriptor.memory),
                cpu_usage: INITIAL_USAGE,
                memory_usage: INITIAL_USAGE,
                registered_at: Utc::now(),
                endpoint,
            },
        );

        tracing::info!(
            agent_id = %id,
            url = %descriptor.url,
            cpu = descriptor.cpu,
            memory = descriptor.memory,
            "Agent registered"
        );
        Ok(id)
    }

    pub async fn get(&self, id: &AgentId) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    /// Ids of every agent that is not dead.
    pub async fn list_active(&self) -> Vec<AgentId> {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.status != AgentStatus::Dead)
            .map(|a| a.id)
            .collect()
    }

    /// Snapshot of all agents, oldest registration first.
    pub async fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by_key(|a| a.registered_at);
        agents
    }

    /// Agents the heartbeat loop should poll.
    pub async fn pollable(&self) -> Vec<Agent> {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.status == AgentStatus::Alive)
            .cloned()
            .collect()
    }

    /// Alive agents whose declared capacity covers `requirement`.
    pub async fn candidates(&self, requirement: &Resources) -> Vec<Agent> {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.status == AgentStatus::Alive && a.capacity.covers(requirement))
            .cloned()
            .collect()
    }

    pub async fn update_usage(&self, id: &AgentId, cpu_usage: f64, memory_usage: f64) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id).ok_or(MasterError::AgentNotFound(*id))?;
        agent.cpu_usage = cpu_usage;
        agent.memory_usage = memory_usage;
        Ok(())
    }

    pub async fn set_status(&self, id: &AgentId, status: AgentStatus) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id).ok_or(MasterError::AgentNotFound(*id))?;
        if agent.status != status {
            tracing::debug!(agent_id = %id, from = %agent.status, to = %status, "Agent status changed");
        }
        agent.status = status;
        Ok(())
    }

    /// Move an alive agent to `icu`. Returns false if it was not alive, so
    /// only one recovery sequence starts per failure.
    pub async fn admit_to_icu(&self, id: &AgentId) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(id) {
            Some(agent) if agent.status == AgentStatus::Alive => {
                agent.status = AgentStatus::Icu;
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}
