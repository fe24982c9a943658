pub mod convert;
pub mod master_service;
pub mod server;

pub use master_service::MasterServiceImpl;
pub use server::GrpcServer;
