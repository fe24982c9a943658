use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::agent::registry::AgentDescriptor;
use crate::grpc::convert::{parse_job_id, proto_to_spec, status_to_proto, summary_to_proto};
use crate::master::Scheduler;
use crate::proto::master_service_server::MasterService;
use crate::proto::{
    GetJobStatusRequest, GetJobStatusResponse, JobSummary, KillJobRequest, KillJobResponse,
    ListJobsRequest, ListJobsResponse, PingRequest, PingResponse, RegisterAgentRequest,
    RegisterAgentResponse, RequestOutputRequest, RequestOutputResponse, SubmitJobRequest,
    SubmitJobResponse,
};

const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 1000;

/// gRPC service for clients and registering agents
pub struct MasterServiceImpl {
    scheduler: Arc<Scheduler>,
}

impl MasterServiceImpl {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[tonic::async_trait]
impl MasterService for MasterServiceImpl {
    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, Status> {
        let spec = proto_to_spec(request.into_inner().spec)?;

        let job_id = self.scheduler.submit_job(spec).await?;
        let status = self.scheduler.get_status(&job_id).await?;

        Ok(Response::new(SubmitJobResponse {
            job_id: job_id.to_string(),
            status: status_to_proto(&status) as i32,
        }))
    }

    async fn register_agent(
        &self,
        request: Request<RegisterAgentRequest>,
    ) -> Result<Response<RegisterAgentResponse>, Status> {
        let req = request.into_inner();
        let descriptor = AgentDescriptor::new(req.url, req.cpu, req.memory);

        let agent_id = self.scheduler.register_agent(descriptor).await?;

        Ok(Response::new(RegisterAgentResponse {
            accepted: true,
            agent_id: agent_id.to_string(),
        }))
    }

    async fn get_job_status(
        &self,
        request: Request<GetJobStatusRequest>,
    ) -> Result<Response<GetJobStatusResponse>, Status> {
        let job_id = parse_job_id(&request.into_inner().job_id)?;
        let job = self.scheduler.get_job(&job_id).await?;

        Ok(Response::new(GetJobStatusResponse {
            job_id: job.id.to_string(),
            status: status_to_proto(&job.status) as i32,
            agent_id: job.agent_id.map(|id| id.to_string()).unwrap_or_default(),
            restart_count: job.restart_count,
        }))
    }

    async fn kill_job(
        &self,
        request: Request<KillJobRequest>,
    ) -> Result<Response<KillJobResponse>, Status> {
        let job_id = parse_job_id(&request.into_inner().job_id)?;
        let killed = self.scheduler.kill_job(&job_id).await?;
        Ok(Response::new(KillJobResponse { killed }))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let req = request.into_inner();

        let page_size = if req.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            (req.page_size as usize).min(MAX_PAGE_SIZE)
        };

        // Offset-based: the token is the starting index
        let offset: usize = if req.page_token.is_empty() {
            0
        } else {
            req.page_token
                .parse()
                .map_err(|_| Status::invalid_argument("Invalid page token"))?
        };

        let all_jobs = self.scheduler.list_jobs().await;
        let total_count = all_jobs.len();

        let jobs: Vec<JobSummary> = all_jobs
            .iter()
            .skip(offset)
            .take(page_size)
            .map(summary_to_proto)
            .collect();

        let next_offset = offset + jobs.len();
        let next_page_token = if next_offset < total_count {
            next_offset.to_string()
        } else {
            String::new()
        };

        Ok(Response::new(ListJobsResponse {
            jobs,
            next_page_token,
            total_count: total_count as u32,
        }))
    }

    async fn request_output(
        &self,
        request: Request<RequestOutputRequest>,
    ) -> Result<Response<RequestOutputResponse>, Status> {
        let job_id = parse_job_id(&request.into_inner().job_id)?;
        let output = self.scheduler.request_output(&job_id).await?;
        Ok(Response::new(RequestOutputResponse { output }))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse {
            alive: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }
}
