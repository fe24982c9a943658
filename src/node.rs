use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::grpc::GrpcConnector;
use crate::config::MasterConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::MasterError;
use crate::grpc::GrpcServer;
use crate::master::Scheduler;
use crate::tls::TlsIdentity;

/// A running master: scheduler, heartbeat monitor, dashboard and gRPC API.
pub struct MasterNode {
    pub config: MasterConfig,
    pub scheduler: Arc<Scheduler>,
    pub dashboard_addr: Option<SocketAddr>,
    tls_identity: Option<TlsIdentity>,
}

impl MasterNode {
    pub fn new(
        config: MasterConfig,
        dashboard_addr: Option<SocketAddr>,
        tls_identity: Option<TlsIdentity>,
    ) -> Result<Self, MasterError> {
        config.validate()?;

        let connector = Arc::new(GrpcConnector::new(
            tls_identity.clone(),
            config.agent_timeout(),
        ));
        let scheduler = Arc::new(Scheduler::new(&config, connector));

        Ok(Self {
            config,
            scheduler,
            dashboard_addr,
            tls_identity,
        })
    }

    /// Run every subsystem until `shutdown` is cancelled.
    ///
    /// The heartbeat monitor and the dashboard run as spawned tasks; the gRPC
    /// server runs on the calling task.
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC server fails to start or encounters a fatal error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        let monitor = self.scheduler.monitor();
        let monitor_token = shutdown.clone();
        let monitor_handle = tokio::spawn(async move {
            monitor.run(monitor_token).await;
        });

        let dashboard_handle = self.dashboard_addr.map(|dashboard_addr| {
            let state = DashboardState {
                scheduler: self.scheduler.clone(),
            };
            let token = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(dashboard_addr, state, token).await;
            })
        });

        let server = GrpcServer::new(
            self.config.listen_addr,
            self.scheduler.clone(),
            self.tls_identity,
        );
        let result = server.run(shutdown.clone()).await;

        // A server failure takes the rest of the node down with it.
        shutdown.cancel();
        if let Err(e) = monitor_handle.await {
            tracing::warn!(error = %e, "Heartbeat monitor task failed");
        }
        if let Some(handle) = dashboard_handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dashboard task failed");
            }
        }

        // Recovery sequences can run for minutes; they are dropped with the runtime.
        tracing::info!(
            abandoned_recoveries = self.scheduler.monitor().recoveries_in_progress(),
            "Master stopped"
        );

        result?;
        Ok(())
    }
}
