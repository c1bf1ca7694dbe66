//! TLS material for gRPC and HTTP clients

use std::time::Duration;

use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::config::SecurityConfig;
use crate::error::{Error, Result};

/// PEM material loaded once from the configured paths
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    ca: Vec<u8>,
    cert: Option<Vec<u8>>,
    key: Option<Vec<u8>>,
}

impl TlsMaterial {
    /// Load PEM files; `None` when TLS is not configured
    pub fn load(config: &SecurityConfig) -> Result<Option<Self>> {
        let Some(ca_path) = &config.ca_path else {
            return Ok(None);
        };
        let ca = std::fs::read(ca_path)?;
        let (cert, key) = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => (Some(std::fs::read(cert)?), Some(std::fs::read(key)?)),
            (None, None) => (None, None),
            _ => {
                return Err(Error::Tls(
                    "cert_path and key_path must be set together".to_string(),
                ))
            }
        };
        Ok(Some(Self { ca, cert, key }))
    }

    /// gRPC client TLS config
    pub fn grpc_config(&self) -> ClientTlsConfig {
        let config = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(&self.ca));
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => config.identity(Identity::from_pem(cert, key)),
            _ => config,
        }
    }

    fn apply_http(&self, builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        let mut builder = builder
            .use_rustls_tls()
            .add_root_certificate(reqwest::Certificate::from_pem(&self.ca)?);
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            let mut pem = cert.clone();
            pem.push(b'\n');
            pem.extend_from_slice(key);
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }
        Ok(builder)
    }
}

/// HTTP client for the metadata service and the placement side channel
pub fn build_http_client(tls: Option<&TlsMaterial>, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(tls) = tls {
        builder = tls.apply_http(builder)?;
    }
    Ok(builder.build()?)
}
