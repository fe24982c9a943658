//! Test harness for master integration tests.
//!
//! Provides scriptable fake agents (in-process and over gRPC), a connector
//! that hands them out by URL, and polling helpers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use dockmaster::agent::endpoint::{
    AgentCallError, AgentConnector, AgentEndpoint, Capabilities, JobReport, Pulse,
    AGENT_CONTRACT_VERSION, REQUIRED_OPERATIONS,
};
use dockmaster::agent::registry::AgentDescriptor;
use dockmaster::master::Scheduler;
use dockmaster::monitor::CprSchedule;
use dockmaster::proto;
use dockmaster::proto::agent_service_server::{AgentService, AgentServiceServer};
use dockmaster::scheduler::job::{JobId, JobSpec, JobStatus, Resources};

/// Heartbeat period used by monitor tests
pub const TEST_HEARTBEAT: Duration = Duration::from_millis(20);

/// Recovery schedule with the production shape and test-sized delays
pub fn test_cpr() -> CprSchedule {
    CprSchedule::from_millis(&[10, 20, 30])
}

pub fn test_scheduler(connector: Arc<FakeConnector>) -> Scheduler {
    Scheduler::with_schedule(connector, 10_000, TEST_HEARTBEAT, test_cpr())
}

pub fn small_spec(image: &str) -> JobSpec {
    JobSpec::new(image, Resources::new(1, 0.5), Resources::new(2, 1.0))
}

pub fn descriptor(url: &str) -> AgentDescriptor {
    AgentDescriptor::new(url, 4, 8.0)
}

pub fn pulse(cpu_usage: f64, memory_usage: f64, jobs: Vec<(JobId, JobStatus, u32)>) -> Pulse {
    Pulse {
        cpu_usage,
        memory_usage,
        jobs: jobs
            .into_iter()
            .map(|(job_id, status, restart_count)| JobReport {
                job_id,
                status,
                restart_count,
            })
            .collect(),
    }
}

// =============================================================================
// In-process fake agent
// =============================================================================

struct FakeState {
    accept: bool,
    down: bool,
    submit_error: Option<AgentCallError>,
    crash_on_submit: bool,
    scripted_heartbeats: VecDeque<Result<Pulse, AgentCallError>>,
    pulse: Pulse,
    operations: HashSet<String>,
    contract_version: u32,
    outputs: HashMap<JobId, Vec<u8>>,
    submitted: Vec<JobId>,
    killed: Vec<JobId>,
    submit_calls: usize,
    heartbeat_calls: usize,
}

/// Scriptable [`AgentEndpoint`]. Accepts everything and answers every
/// heartbeat until told otherwise.
pub struct FakeAgent {
    state: Mutex<FakeState>,
}

impl FakeAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                accept: true,
                down: false,
                submit_error: None,
                crash_on_submit: false,
                scripted_heartbeats: VecDeque::new(),
                pulse: Pulse::default(),
                operations: REQUIRED_OPERATIONS.iter().map(|s| s.to_string()).collect(),
                contract_version: AGENT_CONTRACT_VERSION,
                outputs: HashMap::new(),
                submitted: Vec::new(),
                killed: Vec::new(),
                submit_calls: 0,
                heartbeat_calls: 0,
            }),
        })
    }

    pub fn set_accept(&self, accept: bool) {
        self.state.lock().unwrap().accept = accept;
    }

    /// While down every call fails as unreachable, unless a scripted
    /// heartbeat is queued.
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    pub fn fail_submissions(&self, err: AgentCallError) {
        self.state.lock().unwrap().submit_error = Some(err);
    }

    /// Make the next submissions panic, as a bug in the calling task would.
    pub fn set_crash_on_submit(&self, crash: bool) {
        self.state.lock().unwrap().crash_on_submit = crash;
    }

    /// Queue heartbeat answers, consumed before the default pulse.
    pub fn script_heartbeats(&self, answers: Vec<Result<Pulse, AgentCallError>>) {
        self.state.lock().unwrap().scripted_heartbeats.extend(answers);
    }

    pub fn set_pulse(&self, pulse: Pulse) {
        self.state.lock().unwrap().pulse = pulse;
    }

    pub fn set_output(&self, job_id: JobId, output: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .outputs
            .insert(job_id, output.to_vec());
    }

    pub fn set_operations(&self, operations: &[&str]) {
        self.state.lock().unwrap().operations =
            operations.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_contract_version(&self, version: u32) {
        self.state.lock().unwrap().contract_version = version;
    }

    pub fn submitted(&self) -> Vec<JobId> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn killed(&self) -> Vec<JobId> {
        self.state.lock().unwrap().killed.clone()
    }

    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.state.lock().unwrap().heartbeat_calls
    }
}

fn unreachable() -> AgentCallError {
    AgentCallError::Unreachable("connection refused".to_string())
}

#[tonic::async_trait]
impl AgentEndpoint for FakeAgent {
    async fn submit_job(&self, job_id: JobId, _spec: &JobSpec) -> Result<bool, AgentCallError> {
        if self.state.lock().unwrap().crash_on_submit {
            panic!("agent crashed during submission");
        }
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        if let Some(err) = state.submit_error.clone() {
            return Err(err);
        }
        if state.down {
            return Err(unreachable());
        }
        if state.accept {
            state.submitted.push(job_id);
        }
        Ok(state.accept)
    }

    async fn heartbeat(&self) -> Result<Pulse, AgentCallError> {
        let mut state = self.state.lock().unwrap();
        state.heartbeat_calls += 1;
        if let Some(answer) = state.scripted_heartbeats.pop_front() {
            return answer;
        }
        if state.down {
            return Err(unreachable());
        }
        Ok(state.pulse.clone())
    }

    async fn fetch_output(&self, job_id: JobId) -> Result<Vec<u8>, AgentCallError> {
        let state = self.state.lock().unwrap();
        if state.down {
            return Err(unreachable());
        }
        state
            .outputs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| AgentCallError::JobUnknown(job_id.to_string()))
    }

    async fn kill_job(&self, job_id: JobId) -> Result<bool, AgentCallError> {
        let mut state = self.state.lock().unwrap();
        if state.down {
            return Err(unreachable());
        }
        state.killed.push(job_id);
        Ok(true)
    }

    async fn probe_capabilities(&self) -> Result<Capabilities, AgentCallError> {
        let state = self.state.lock().unwrap();
        if state.down {
            return Err(unreachable());
        }
        Ok(Capabilities {
            operations: state.operations.clone(),
            contract_version: state.contract_version,
        })
    }
}

/// Hands out fake agents by URL; unknown URLs are unreachable.
#[derive(Default)]
pub struct FakeConnector {
    agents: Mutex<HashMap<String, Arc<FakeAgent>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a fake agent reachable at `url`.
    pub fn add(&self, url: &str) -> Arc<FakeAgent> {
        let agent = FakeAgent::new();
        self.agents
            .lock()
            .unwrap()
            .insert(url.to_string(), agent.clone());
        agent
    }
}

#[tonic::async_trait]
impl AgentConnector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn AgentEndpoint>, AgentCallError> {
        let agent: Arc<dyn AgentEndpoint> = self
            .agents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(unreachable)?;
        Ok(agent)
    }
}

// =============================================================================
// Fake agent over gRPC
// =============================================================================

/// Image name the gRPC fake agent reports as missing
pub const MISSING_IMAGE: &str = "registry.local/missing:latest";

#[derive(Default)]
struct GrpcAgentState {
    jobs: HashMap<String, JobStatus>,
}

#[derive(Clone, Default)]
struct GrpcFakeAgent {
    state: Arc<Mutex<GrpcAgentState>>,
}

#[tonic::async_trait]
impl AgentService for GrpcFakeAgent {
    async fn submit_job(
        &self,
        request: Request<proto::AgentSubmitJobRequest>,
    ) -> Result<Response<proto::AgentSubmitJobResponse>, Status> {
        let req = request.into_inner();
        let image = req.spec.map(|s| s.image).unwrap_or_default();
        if image == MISSING_IMAGE {
            return Err(Status::not_found(format!("no such image: {}", image)));
        }
        self.state
            .lock()
            .unwrap()
            .jobs
            .insert(req.job_id, JobStatus::Running);
        Ok(Response::new(proto::AgentSubmitJobResponse { accepted: true }))
    }

    async fn heartbeat(
        &self,
        _request: Request<proto::HeartbeatRequest>,
    ) -> Result<Response<proto::HeartbeatResponse>, Status> {
        let state = self.state.lock().unwrap();
        let jobs = state
            .jobs
            .iter()
            .map(|(job_id, status)| proto::JobSummary {
                job_id: job_id.clone(),
                status: dockmaster::grpc::convert::status_to_proto(status) as i32,
                restart_count: 0,
            })
            .collect();
        Ok(Response::new(proto::HeartbeatResponse {
            cpu_usage: 0.2,
            memory_usage: 0.3,
            jobs,
        }))
    }

    async fn fetch_output(
        &self,
        request: Request<proto::FetchOutputRequest>,
    ) -> Result<Response<proto::FetchOutputResponse>, Status> {
        let job_id = request.into_inner().job_id;
        if !self.state.lock().unwrap().jobs.contains_key(&job_id) {
            return Err(Status::not_found("unknown job"));
        }
        Ok(Response::new(proto::FetchOutputResponse {
            output: format!("output of {}\n", job_id).into_bytes(),
        }))
    }

    async fn kill_job(
        &self,
        request: Request<proto::AgentKillJobRequest>,
    ) -> Result<Response<proto::AgentKillJobResponse>, Status> {
        let job_id = request.into_inner().job_id;
        let killed = self
            .state
            .lock()
            .unwrap()
            .jobs
            .insert(job_id, JobStatus::End)
            .is_some();
        Ok(Response::new(proto::AgentKillJobResponse { killed }))
    }

    async fn probe_capabilities(
        &self,
        _request: Request<proto::ProbeCapabilitiesRequest>,
    ) -> Result<Response<proto::ProbeCapabilitiesResponse>, Status> {
        Ok(Response::new(proto::ProbeCapabilitiesResponse {
            operations: REQUIRED_OPERATIONS.iter().map(|s| s.to_string()).collect(),
            contract_version: AGENT_CONTRACT_VERSION,
        }))
    }
}

/// Handle to a running gRPC fake agent
pub struct TestAgentServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestAgentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(AgentServiceServer::new(GrpcFakeAgent::default()))
                .serve_with_incoming_shutdown(
                    TcpListenerStream::new(listener),
                    token.cancelled_owned(),
                )
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop serving; later calls to this agent fail as unreachable.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), self.handle).await;
    }
}

/// Reserve a free local port for a server that binds by address.
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn random_job_id() -> JobId {
    Uuid::new_v4()
}

// =============================================================================
// Polling helpers
// =============================================================================

/// Poll `condition` until it holds or `timeout_duration` elapses
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
