use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::master_service::MasterServiceImpl;
use crate::master::Scheduler;
use crate::proto::master_service_server::MasterServiceServer;
use crate::tls::TlsIdentity;

pub struct GrpcServer {
    addr: SocketAddr,
    scheduler: Arc<Scheduler>,
    tls_identity: Option<TlsIdentity>,
}

impl GrpcServer {
    pub fn new(
        addr: SocketAddr,
        scheduler: Arc<Scheduler>,
        tls_identity: Option<TlsIdentity>,
    ) -> Self {
        Self {
            addr,
            scheduler,
            tls_identity,
        }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let master_service = MasterServiceImpl::new(self.scheduler.clone());

        let mut builder = Server::builder();
        if let Some(ref tls_identity) = self.tls_identity {
            builder = builder.tls_config(tls_identity.server_tls_config())?;
        }

        tracing::info!(
            addr = %self.addr,
            tls = self.tls_identity.is_some(),
            "Starting gRPC server"
        );

        builder
            .add_service(MasterServiceServer::new(master_service))
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await
    }
}
