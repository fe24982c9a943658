pub mod agent;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod grpc;
pub mod master;
pub mod monitor;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod tls;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("dockmaster");
}
