use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};
use uuid::Uuid;

/// Metadata key carrying the machine-readable fault kind on gRPC errors.
pub const FAULT_METADATA_KEY: &str = "x-dockmaster-fault";

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("Invalid job descriptor: {0}")]
    InvalidJobDescriptor(String),

    #[error("Invalid agent descriptor: {0}")]
    InvalidAgentDescriptor(String),

    #[error("Incompatible agent: {0}")]
    IncompatibleAgent(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Job {0} has not been placed on any agent")]
    JobNotPlaced(Uuid),

    #[error("Agent does not know job {0}")]
    JobUnknownToAgent(Uuid),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Agent unreachable: {0}")]
    AgentUnreachable(String),

    #[error("Agent fault: {0}")]
    AgentFault(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Job registry is at capacity")]
    RegistryFull,

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MasterError {
    /// Stable identifier for the fault, sent to clients next to the status code.
    pub fn kind(&self) -> &'static str {
        match self {
            MasterError::InvalidJobDescriptor(_) => "invalid-job-descriptor",
            MasterError::InvalidAgentDescriptor(_) => "invalid-agent-descriptor",
            MasterError::IncompatibleAgent(_) => "incompatible-agent",
            MasterError::JobNotFound(_) => "job-not-found",
            MasterError::AgentNotFound(_) => "agent-not-found",
            MasterError::JobNotPlaced(_) => "job-not-placed",
            MasterError::JobUnknownToAgent(_) => "job-unknown-to-agent",
            MasterError::ImageNotFound(_) => "image-not-found",
            MasterError::AgentUnreachable(_) => "agent-unreachable",
            MasterError::AgentFault(_) => "agent-fault",
            MasterError::InvalidConfig(_) => "invalid-config",
            MasterError::RegistryFull => "registry-full",
            MasterError::Transport(_) => "transport",
            MasterError::Internal(_) => "internal",
        }
    }

    fn code(&self) -> Code {
        match self {
            MasterError::InvalidJobDescriptor(_)
            | MasterError::InvalidAgentDescriptor(_)
            | MasterError::InvalidConfig(_) => Code::InvalidArgument,
            MasterError::IncompatibleAgent(_) | MasterError::JobNotPlaced(_) => {
                Code::FailedPrecondition
            }
            MasterError::JobNotFound(_)
            | MasterError::AgentNotFound(_)
            | MasterError::JobUnknownToAgent(_)
            | MasterError::ImageNotFound(_) => Code::NotFound,
            MasterError::AgentUnreachable(_) | MasterError::Transport(_) => Code::Unavailable,
            MasterError::RegistryFull => Code::ResourceExhausted,
            MasterError::AgentFault(_) | MasterError::Internal(_) => Code::Internal,
        }
    }
}

impl From<MasterError> for Status {
    fn from(err: MasterError) -> Self {
        let mut status = Status::new(err.code(), err.to_string());
        status
            .metadata_mut()
            .insert(FAULT_METADATA_KEY, MetadataValue::from_static(err.kind()));
        status
    }
}

/// Reads the fault kind attached by the master, if any.
pub fn fault_kind(status: &Status) -> Option<&str> {
    status
        .metadata()
        .get(FAULT_METADATA_KEY)
        .and_then(|v| v.to_str().ok())
}

pub type Result<T> = std::result::Result<T, MasterError>;
