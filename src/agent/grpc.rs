use std::sync::Arc;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use uuid::Uuid;

use crate::agent::endpoint::{
    AgentCallError, AgentConnector, AgentEndpoint, Capabilities, JobReport, Pulse,
};
use crate::grpc::convert::{proto_status_to_internal, spec_to_proto};
use crate::proto::agent_service_client::AgentServiceClient;
use crate::proto::{
    AgentKillJobRequest, AgentSubmitJobRequest, FetchOutputRequest, HeartbeatRequest,
    ProbeCapabilitiesRequest,
};
use crate::scheduler::job::{JobId, JobSpec};
use crate::tls::TlsIdentity;

/// Transport failures become `Unreachable`, anything else the agent said is a `Fault`.
fn classify(status: Status) -> AgentCallError {
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            AgentCallError::Unreachable(status.message().to_string())
        }
        _ => AgentCallError::Fault(format!("{:?}: {}", status.code(), status.message())),
    }
}

/// [`AgentEndpoint`] backed by a tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcAgentEndpoint {
    client: AgentServiceClient<Channel>,
}

impl GrpcAgentEndpoint {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: AgentServiceClient::new(channel),
        }
    }
}

#[tonic::async_trait]
impl AgentEndpoint for GrpcAgentEndpoint {
    async fn submit_job(&self, job_id: JobId, spec: &JobSpec) -> Result<bool, AgentCallError> {
        let mut client = self.client.clone();
        let response = client
            .submit_job(AgentSubmitJobRequest {
                job_id: job_id.to_string(),
                spec: Some(spec_to_proto(spec)),
            })
            .await
            .map_err(|status| match status.code() {
                Code::NotFound => AgentCallError::ImageNotFound(spec.image.clone()),
                _ => classify(status),
            })?;
        Ok(response.into_inner().accepted)
    }

    async fn heartbeat(&self) -> Result<Pulse, AgentCallError> {
        let mut client = self.client.clone();
        let resp = client
            .heartbeat(HeartbeatRequest {})
            .await
            .map_err(classify)?
            .into_inner();

        let jobs = resp
            .jobs
            .iter()
            .filter_map(|entry| {
                let job_id = Uuid::parse_str(&entry.job_id).ok()?;
                let status = proto_status_to_internal(entry.status())?;
                Some(JobReport {
                    job_id,
                    status,
                    restart_count: entry.restart_count,
                })
            })
            .collect();

        Ok(Pulse {
            cpu_usage: resp.cpu_usage,
            memory_usage: resp.memory_usage,
            jobs,
        })
    }

    async fn fetch_output(&self, job_id: JobId) -> Result<Vec<u8>, AgentCallError> {
        let mut client = self.client.clone();
        let response = client
            .fetch_output(FetchOutputRequest {
                job_id: job_id.to_string(),
            })
            .await
            .map_err(|status| match status.code() {
                Code::NotFound => AgentCallError::JobUnknown(job_id.to_string()),
                _ => classify(status),
            })?;
        Ok(response.into_inner().output)
    }

    async fn kill_job(&self, job_id: JobId) -> Result<bool, AgentCallError> {
        let mut client = self.client.clone();
        let response = client
            .kill_job(AgentKillJobRequest {
                job_id: job_id.to_string(),
            })
            .await
            .map_err(classify)?;
        Ok(response.into_inner().killed)
    }

    async fn probe_capabilities(&self) -> Result<Capabilities, AgentCallError> {
        let mut client = self.client.clone();
        let resp = client
            .probe_capabilities(ProbeCapabilitiesRequest {})
            .await
            .map_err(classify)?
            .into_inner();
        Ok(Capabilities {
            operations: resp.operations.into_iter().collect(),
            contract_version: resp.contract_version,
        })
    }
}

/// Dials agents over gRPC, with mTLS for `https://` URLs when configured.
#[derive(Clone)]
pub struct GrpcConnector {
    tls_identity: Option<TlsIdentity>,
    timeout: Duration,
}

impl GrpcConnector {
    pub fn new(tls_identity: Option<TlsIdentity>, timeout: Duration) -> Self {
        Self {
            tls_identity,
            timeout,
        }
    }

    async fn create_channel(&self, url: &str) -> Result<Channel, AgentCallError> {
        let endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| AgentCallError::Unreachable(format!("Invalid endpoint: {}", e)))?
            .timeout(self.timeout)
            .connect_timeout(self.timeout);

        let endpoint = if url.starts_with("https://") {
            let tls_identity = self.tls_identity.as_ref().ok_or_else(|| {
                AgentCallError::Unreachable("https agent requires TLS to be configured".to_string())
            })?;
            endpoint
                .tls_config(tls_identity.client_tls_config())
                .map_err(|e| AgentCallError::Unreachable(format!("TLS config error: {}", e)))?
        } else {
            endpoint
        };

        endpoint
            .connect()
            .await
            .map_err(|e| AgentCallError::Unreachable(format!("Failed to connect to {}: {}", url, e)))
    }
}

#[tonic::async_trait]
impl AgentConnector for GrpcConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn AgentEndpoint>, AgentCallError> {
        let channel = self.create_channel(url).await?;
        Ok(Arc::new(GrpcAgentEndpoint::new(channel)))
    }
}
