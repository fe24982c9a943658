//! Worker agents as seen from the master.
//!
//! - [`registry`]: the [`AgentRegistry`] owning agent records and their
//!   `alive -> icu -> alive|dead` lifecycle
//! - [`endpoint`]: the [`AgentEndpoint`] contract the master calls
//!   (submit, heartbeat, fetch output, kill, capability probe)
//! - [`grpc`]: the tonic implementation of that contract

pub mod endpoint;
pub mod grpc;
pub mod registry;

pub use endpoint::{AgentCallError, AgentConnector, AgentEndpoint, JobReport, Pulse};
pub use grpc::{GrpcAgentEndpoint, GrpcConnector};
pub use registry::{Agent, AgentDescriptor, AgentId, AgentRegistry, AgentStatus};
