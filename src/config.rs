use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MasterError, Result};

/// TLS configuration for the master listener and for agent connections.
///
/// When enabled, the master serves gRPC over mutual TLS and presents the same
/// identity when it dials agents registered with an `https://` URL.
/// Both sides must have certificates signed by the cluster CA.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the CA certificate (PEM format).
    pub ca_cert_path: Option<PathBuf>,

    /// Path to the master's certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to the master's private key (PEM format).
    pub key_path: Option<PathBuf>,

    /// Allow plaintext when TLS is requested but the files are missing.
    pub allow_insecure: bool,
}

impl TlsConfig {
    /// Check if TLS is properly configured with all required files.
    pub fn is_complete(&self) -> bool {
        self.enabled
            && self.ca_cert_path.is_some()
            && self.cert_path.is_some()
            && self.key_path.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub listen_addr: SocketAddr,
    /// Period of the heartbeat poll cycle.
    pub heartbeat_interval_ms: u64,
    /// Backoff delays of the recovery sequence run against an unresponsive agent.
    pub cpr_backoff_ms: Vec<u64>,
    /// Transport timeout applied to every call made to an agent.
    pub agent_timeout_ms: u64,
    pub max_jobs: usize,
    pub tls: TlsConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            heartbeat_interval_ms: 10_000,
            cpr_backoff_ms: vec![10_000, 30_000, 60_000],
            agent_timeout_ms: 5_000,
            max_jobs: 10_000,
            tls: TlsConfig::default(),
        }
    }
}

impl MasterConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_cpr_backoff_ms(mut self, delays: Vec<u64>) -> Self {
        self.cpr_backoff_ms = delays;
        self
    }

    /// Reject settings the monitor and agent connections cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(MasterError::InvalidConfig(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.agent_timeout_ms == 0 {
            return Err(MasterError::InvalidConfig(
                "agent_timeout_ms must be positive".to_string(),
            ));
        }
        if self.cpr_backoff_ms.is_empty() {
            return Err(MasterError::InvalidConfig(
                "cpr_backoff_ms needs at least one delay".to_string(),
            ));
        }
        if self.max_jobs == 0 {
            return Err(MasterError::InvalidConfig(
                "max_jobs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}
