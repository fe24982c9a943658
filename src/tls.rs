//! TLS utilities for loading certificates and configuring mTLS.
//!
//! The master serves its gRPC API over mutual TLS and uses the same identity
//! when it dials agents registered with an `https://` URL.

use std::path::PathBuf;

use tokio::fs;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;

/// Name every cluster certificate is issued for.
pub const CLUSTER_DOMAIN: &str = "dockmaster-cluster";

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate path not configured")]
    MissingCaCert,

    #[error("Master certificate path not configured")]
    MissingCert,

    #[error("Private key path not configured")]
    MissingKey,

    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Master certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loaded TLS materials ready for use with tonic.
///
/// Contains the master's identity (certificate + private key) and the CA
/// certificate used to verify clients and agents.
#[derive(Clone)]
pub struct TlsIdentity {
    /// The master's identity (certificate + private key)
    identity: Identity,
    /// CA certificate for verifying clients and agents
    ca_cert: Certificate,
}

async fn read_pem(
    path: Option<&PathBuf>,
    missing: TlsError,
    not_found: fn(PathBuf) -> TlsError,
) -> Result<Vec<u8>, TlsError> {
    let path = path.ok_or(missing)?;
    if !path.exists() {
        return Err(not_found(path.clone()));
    }
    Ok(fs::read(path).await?)
}

impl TlsIdentity {
    /// Load TLS materials from the paths in `config`, CA first.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let ca_pem = read_pem(
            config.ca_cert_path.as_ref(),
            TlsError::MissingCaCert,
            TlsError::CaCertNotFound,
        )
        .await?;
        let cert_pem = read_pem(
            config.cert_path.as_ref(),
            TlsError::MissingCert,
            TlsError::CertNotFound,
        )
        .await?;
        let key_pem = read_pem(
            config.key_path.as_ref(),
            TlsError::MissingKey,
            TlsError::KeyNotFound,
        )
        .await?;

        Ok(Self {
            identity: Identity::from_pem(cert_pem, key_pem),
            ca_cert: Certificate::from_pem(ca_pem),
        })
    }

    /// Create server TLS config with client certificate verification (mTLS).
    ///
    /// Clients (CLI users and registering agents) must present a certificate
    /// signed by the cluster CA.
    pub fn server_tls_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity.clone())
            .client_ca_root(self.ca_cert.clone())
    }

    /// Create client TLS config for dialing agents.
    ///
    /// Agents are usually addressed by IP, so certificates are checked against
    /// the CA and a fixed cluster domain name rather than the URL host.
    pub fn client_tls_config(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .domain_name(CLUSTER_DOMAIN)
            .ca_certificate(self.ca_cert.clone())
            .identity(self.identity.clone())
    }
}
