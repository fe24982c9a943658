use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing_subscriber::EnvFilter;

use dockmaster::config::{MasterConfig, TlsConfig};
use dockmaster::error::fault_kind;
use dockmaster::grpc::convert::spec_to_proto;
use dockmaster::node::MasterNode;
use dockmaster::proto::master_service_client::MasterServiceClient;
use dockmaster::proto::{
    GetJobStatusRequest, JobStatus, KillJobRequest, ListJobsRequest, PingRequest,
    RegisterAgentRequest, RequestOutputRequest, SubmitJobRequest,
};
use dockmaster::scheduler::job::JobSpec;
use dockmaster::shutdown::install_shutdown_handler;
use dockmaster::tls::{TlsIdentity, CLUSTER_DOMAIN};

#[derive(Parser, Debug)]
#[command(name = "dockmaster")]
#[command(version)]
#[command(about = "A cluster job scheduler placing container jobs on worker agents")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the master
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Agent management commands
    Agent {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Check that the master is reachable
    Ping {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "8888")]
    port: u16,

    /// Port for the web dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Period of the agent heartbeat poll
    #[arg(long, default_value = "10000", value_parser = clap::value_parser!(u64).range(1..))]
    heartbeat_interval_ms: u64,

    /// Recovery delays tried against an unresponsive agent (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "10000,30000,60000")]
    cpr_backoff_ms: Vec<u64>,

    /// Timeout applied to every call made to an agent
    #[arg(long, default_value = "5000", value_parser = clap::value_parser!(u64).range(1..))]
    agent_timeout_ms: u64,

    /// Maximum number of jobs the master keeps
    #[arg(long, default_value = "10000")]
    max_jobs: usize,

    // === TLS Options ===
    /// Enable TLS for the API and for https:// agents
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate (PEM format)
    #[arg(long, requires = "tls")]
    ca_cert: Option<PathBuf>,

    /// Path to master certificate (PEM format)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Path to master private key (PEM format)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Allow running without TLS even when --tls is specified but certs are missing.
    /// Useful for development. NOT recommended for production.
    #[arg(long)]
    allow_insecure: bool,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Master address (use https:// for TLS)
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8888")]
    addr: String,

    /// Path to CA certificate (PEM format) for TLS
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (PEM format) for mTLS
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to client private key (PEM format) for mTLS
    #[arg(long)]
    key: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a job described by a YAML file
    Submit {
        /// Path to the job file
        file: PathBuf,
    },
    /// Get status of a specific job
    Status {
        /// The job ID (UUID)
        job_id: String,
    },
    /// List all jobs
    List {
        /// Number of jobs per page (default: 100, max: 1000)
        #[arg(long, default_value = "100")]
        page_size: u32,

        /// Fetch all pages automatically
        #[arg(long)]
        all: bool,
    },
    /// Kill a job on its agent
    Kill {
        /// The job ID (UUID)
        job_id: String,
    },
    /// Print the job's output as collected by its agent
    Output {
        /// The job ID (UUID)
        job_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum AgentCommands {
    /// Register a worker agent with the master
    Register {
        /// Agent URL, e.g. http://10.0.0.5:9000
        #[arg(long)]
        url: String,

        /// Number of CPU cores the agent offers
        #[arg(long)]
        cpu: u32,

        /// Memory the agent offers, in GB
        #[arg(long)]
        memory: f64,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: String,
    status: String,
}

#[derive(Serialize)]
struct JobStatusOutput {
    job_id: String,
    status: String,
    agent_id: Option<String>,
    restart_count: u32,
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    status: String,
    restart_count: u32,
}

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<JobListItem>,
    total_count: u32,
    has_more: bool,
}

#[derive(Serialize)]
struct KillOutput {
    job_id: String,
    killed: bool,
}

#[derive(Serialize)]
struct AgentRegisterOutput {
    accepted: bool,
    agent_id: String,
}

#[derive(Serialize)]
struct PingOutput {
    alive: bool,
    version: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn job_status_to_string(status: i32) -> String {
    match JobStatus::try_from(status) {
        Ok(JobStatus::Pending) => "pending".to_string(),
        Ok(JobStatus::Deploying) => "deploying".to_string(),
        Ok(JobStatus::Running) => "running".to_string(),
        Ok(JobStatus::End) => "end".to_string(),
        Ok(JobStatus::Fail) => "fail".to_string(),
        _ => "unknown".to_string(),
    }
}

/// Print a failed RPC with its fault kind and exit.
fn exit_with_status(action: &str, status: &tonic::Status) -> ! {
    match fault_kind(status) {
        Some(kind) => eprintln!("Error: {} failed [{}]: {}", action, kind, status.message()),
        None => eprintln!("Error: {} failed: {}", action, status.message()),
    }
    std::process::exit(1);
}

async fn create_client_channel(args: &ClientArgs) -> Result<Channel, Box<dyn std::error::Error>> {
    let endpoint = Channel::from_shared(args.addr.clone())?;

    let has_tls = args.ca_cert.is_some() || args.addr.starts_with("https://");

    if has_tls {
        let mut tls_config = ClientTlsConfig::new().domain_name(CLUSTER_DOMAIN);

        if let Some(ca_path) = &args.ca_cert {
            let ca_cert_data = tokio::fs::read(ca_path).await?;
            tls_config = tls_config.ca_certificate(Certificate::from_pem(ca_cert_data));
        }

        // Client identity for mTLS, only when both halves are given
        if let (Some(cert_path), Some(key_path)) = (&args.cert, &args.key) {
            let cert_data = tokio::fs::read(cert_path).await?;
            let key_data = tokio::fs::read(key_path).await?;
            tls_config = tls_config.identity(Identity::from_pem(cert_data, key_data));
        }

        Ok(endpoint.tls_config(tls_config)?.connect().await?)
    } else {
        Ok(endpoint.connect().await?)
    }
}

async fn load_tls_identity(
    tls_config: &TlsConfig,
) -> Result<Option<TlsIdentity>, Box<dyn std::error::Error>> {
    if tls_config.is_complete() {
        match TlsIdentity::load(tls_config).await {
            Ok(identity) => {
                tracing::info!("TLS enabled with mTLS authentication");
                Ok(Some(identity))
            }
            Err(e) if tls_config.allow_insecure => {
                tracing::warn!(
                    error = %e,
                    "TLS certificate loading failed, running in insecure mode"
                );
                Ok(None)
            }
            Err(e) => Err(format!("TLS certificate loading failed: {}", e).into()),
        }
    } else if tls_config.enabled {
        if tls_config.allow_insecure {
            tracing::warn!("TLS enabled but certificate paths incomplete, running in insecure mode");
            Ok(None)
        } else {
            Err("TLS enabled but missing required paths (--ca-cert, --cert, --key)".into())
        }
    } else {
        Ok(None)
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let tls_config = TlsConfig {
        enabled: args.tls,
        ca_cert_path: args.ca_cert,
        cert_path: args.cert,
        key_path: args.key,
        allow_insecure: args.allow_insecure,
    };
    let tls_identity = load_tls_identity(&tls_config).await?;

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let config = MasterConfig {
        listen_addr,
        heartbeat_interval_ms: args.heartbeat_interval_ms,
        cpr_backoff_ms: args.cpr_backoff_ms,
        agent_timeout_ms: args.agent_timeout_ms,
        max_jobs: args.max_jobs,
        tls: tls_config,
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        dashboard_addr = ?dashboard_addr,
        heartbeat_interval_ms = config.heartbeat_interval_ms,
        cpr_backoff_ms = ?config.cpr_backoff_ms,
        tls_enabled = tls_identity.is_some(),
        "Starting dockmaster"
    );

    let shutdown = install_shutdown_handler()?;
    let node = MasterNode::new(config, dashboard_addr, tls_identity)?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client: &mut MasterServiceClient<Channel>,
    file: PathBuf,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(&file).await?;
    let spec: JobSpec = serde_yaml::from_str(&raw)
        .map_err(|e| format!("Invalid job file {}: {}", file.display(), e))?;

    let resp = match client
        .submit_job(SubmitJobRequest {
            spec: Some(spec_to_proto(&spec)),
        })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => exit_with_status("Job submission", &status),
    };

    match output_format {
        OutputFormat::Json => {
            let output = JobSubmitOutput {
                job_id: resp.job_id,
                status: job_status_to_string(resp.status),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job submitted successfully!");
            println!("Job ID: {}", resp.job_id);
            println!("Status: {}", job_status_to_string(resp.status));
        }
    }
    Ok(())
}

async fn handle_job_status(
    client: &mut MasterServiceClient<Channel>,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = match client.get_job_status(GetJobStatusRequest { job_id }).await {
        Ok(response) => response.into_inner(),
        Err(status) => exit_with_status("Status lookup", &status),
    };

    let agent_id = (!response.agent_id.is_empty()).then_some(response.agent_id);

    match output_format {
        OutputFormat::Json => {
            let output = JobStatusOutput {
                job_id: response.job_id,
                status: job_status_to_string(response.status),
                agent_id,
                restart_count: response.restart_count,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:   {}", response.job_id);
            println!("Status:   {}", job_status_to_string(response.status));
            println!("Agent:    {}", agent_id.as_deref().unwrap_or("-"));
            println!("Restarts: {}", response.restart_count);
        }
    }
    Ok(())
}

async fn handle_job_list(
    client: &mut MasterServiceClient<Channel>,
    page_size: u32,
    all: bool,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut all_jobs: Vec<JobListItem> = Vec::new();
    let mut total_count;
    let mut has_more = false;
    let mut page_token = String::new();

    loop {
        let response = client
            .list_jobs(ListJobsRequest {
                page_size,
                page_token: page_token.clone(),
            })
            .await?
            .into_inner();

        total_count = response.total_count;

        all_jobs.extend(response.jobs.into_iter().map(|job| JobListItem {
            job_id: job.job_id,
            status: job_status_to_string(job.status),
            restart_count: job.restart_count,
        }));

        if response.next_page_token.is_empty() || !all {
            has_more = !response.next_page_token.is_empty();
            break;
        }
        page_token = response.next_page_token;
    }

    match output_format {
        OutputFormat::Json => {
            let output = JobListOutput {
                jobs: all_jobs,
                total_count,
                has_more,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if all_jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<38} {:<12} RESTARTS", "JOB ID", "STATUS");
                println!("{}", "-".repeat(60));
                for job in &all_jobs {
                    println!("{:<38} {:<12} {}", job.job_id, job.status, job.restart_count);
                }
                println!();
                println!("Showing {} of {} jobs", all_jobs.len(), total_count);
                if has_more {
                    println!("(Use --all to fetch all pages)");
                }
            }
        }
    }
    Ok(())
}

async fn handle_job_kill(
    client: &mut MasterServiceClient<Channel>,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let killed = match client
        .kill_job(KillJobRequest {
            job_id: job_id.clone(),
        })
        .await
    {
        Ok(response) => response.into_inner().killed,
        Err(status) => exit_with_status("Kill", &status),
    };

    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&KillOutput { job_id, killed })?
            );
        }
        OutputFormat::Table => {
            if killed {
                println!("Job {} killed.", job_id);
            } else {
                println!("Agent refused to kill job {}.", job_id);
            }
        }
    }
    Ok(())
}

async fn handle_job_output(
    client: &mut MasterServiceClient<Channel>,
    job_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = match client.request_output(RequestOutputRequest { job_id }).await {
        Ok(response) => response.into_inner().output,
        Err(status) => exit_with_status("Output request", &status),
    };

    // Raw bytes; the output is whatever the container wrote.
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&output)?;
    stdout.flush()?;
    Ok(())
}

async fn handle_agent_register(
    client: &mut MasterServiceClient<Channel>,
    url: String,
    cpu: u32,
    memory: f64,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let resp = match client
        .register_agent(RegisterAgentRequest { url, cpu, memory })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => exit_with_status("Agent registration", &status),
    };

    match output_format {
        OutputFormat::Json => {
            let output = AgentRegisterOutput {
                accepted: resp.accepted,
                agent_id: resp.agent_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Agent registered.");
            println!("Agent ID: {}", resp.agent_id);
        }
    }
    Ok(())
}

async fn handle_ping(
    client: &mut MasterServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let resp = client.ping(PingRequest {}).await?.into_inner();

    match output_format {
        OutputFormat::Json => {
            let output = PingOutput {
                alive: resp.alive,
                version: resp.version,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Master is alive (version {})", resp.version);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            let channel = create_client_channel(&client).await?;
            let mut grpc_client = MasterServiceClient::new(channel);

            match command {
                JobCommands::Submit { file } => {
                    handle_job_submit(&mut grpc_client, file, &client.output).await?;
                }
                JobCommands::Status { job_id } => {
                    handle_job_status(&mut grpc_client, job_id, &client.output).await?;
                }
                JobCommands::List { page_size, all } => {
                    handle_job_list(&mut grpc_client, page_size, all, &client.output).await?;
                }
                JobCommands::Kill { job_id } => {
                    handle_job_kill(&mut grpc_client, job_id, &client.output).await?;
                }
                JobCommands::Output { job_id } => {
                    handle_job_output(&mut grpc_client, job_id).await?;
                }
            }
        }
        Commands::Agent { client, command } => {
            let channel = create_client_channel(&client).await?;
            let mut grpc_client = MasterServiceClient::new(channel);

            match command {
                AgentCommands::Register { url, cpu, memory } => {
                    handle_agent_register(&mut grpc_client, url, cpu, memory, &client.output)
                        .await?;
                }
            }
        }
        Commands::Ping { client } => {
            let channel = create_client_channel(&client).await?;
            let mut grpc_client = MasterServiceClient::new(channel);
            handle_ping(&mut grpc_client, &client.output).await?;
        }
    }

    Ok(())
}
