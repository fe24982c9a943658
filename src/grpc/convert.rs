//! Conversions between protobuf messages and scheduler types.

use tonic::Status;
use uuid::Uuid;

use crate::error::MasterError;
use crate::proto;
use crate::scheduler::job::{JobSpec, JobStatus, JobSummary, Resources};

pub fn status_to_proto(status: &JobStatus) -> proto::JobStatus {
    match status {
        JobStatus::Pending => proto::JobStatus::Pending,
        JobStatus::Deploying => proto::JobStatus::Deploying,
        JobStatus::Running => proto::JobStatus::Running,
        JobStatus::End => proto::JobStatus::End,
        JobStatus::Fail => proto::JobStatus::Fail,
    }
}

/// `None` for `Unspecified`.
pub fn proto_status_to_internal(status: proto::JobStatus) -> Option<JobStatus> {
    match status {
        proto::JobStatus::Pending => Some(JobStatus::Pending),
        proto::JobStatus::Deploying => Some(JobStatus::Deploying),
        proto::JobStatus::Running => Some(JobStatus::Running),
        proto::JobStatus::End => Some(JobStatus::End),
        proto::JobStatus::Fail => Some(JobStatus::Fail),
        proto::JobStatus::Unspecified => None,
    }
}

fn resources_to_proto(resources: &Resources) -> proto::Resources {
    proto::Resources {
        cpu: resources.cpu,
        memory: resources.memory,
    }
}

pub fn spec_to_proto(spec: &JobSpec) -> proto::JobSpec {
    proto::JobSpec {
        image: spec.image.clone(),
        resource_requirement: Some(resources_to_proto(&spec.resource_requirement)),
        resource_limit: Some(resources_to_proto(&spec.resource_limit)),
        restart: spec.restart,
        restart_times: spec.restart_times,
    }
}

/// Build a [`JobSpec`] from the wire, rejecting absent resource blocks.
pub fn proto_to_spec(spec: Option<proto::JobSpec>) -> Result<JobSpec, MasterError> {
    let spec =
        spec.ok_or_else(|| MasterError::InvalidJobDescriptor("job spec is required".to_string()))?;

    let requirement = spec.resource_requirement.ok_or_else(|| {
        MasterError::InvalidJobDescriptor("resource_requirement is required".to_string())
    })?;
    let limit = spec.resource_limit.ok_or_else(|| {
        MasterError::InvalidJobDescriptor("resource_limit is required".to_string())
    })?;

    Ok(JobSpec {
        image: spec.image,
        resource_requirement: Resources::new(requirement.cpu, requirement.memory),
        resource_limit: Resources::new(limit.cpu, limit.memory),
        restart: spec.restart,
        restart_times: spec.restart_times,
    })
}

pub fn summary_to_proto(summary: &JobSummary) -> proto::JobSummary {
    proto::JobSummary {
        job_id: summary.id.to_string(),
        status: status_to_proto(&summary.status) as i32,
        restart_count: summary.restart_count,
    }
}

pub fn parse_job_id(raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument("Invalid job ID"))
}
