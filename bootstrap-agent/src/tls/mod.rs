//! TLS for the controller connection.
//!
//! Only the server is authenticated: the gateway has no certificate yet,
//! which is the point of bootstrapping.

mod roots;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rustls::{ClientConfig, RootCertStore};
use tonic::transport::Channel;

pub use roots::load_trust_roots;

/// Client TLS configuration trusting only `roots`.
pub fn client_config(roots: RootCertStore) -> Result<ClientConfig> {
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("Failed to select TLS protocol versions")?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(config)
}

/// Build a TLS channel with the given configuration.
///
/// `timeout` bounds both connection setup and every call on the channel.
pub async fn build_tls_channel(
    addr: &str,
    tls_config: ClientConfig,
    timeout: Duration,
) -> Result<Channel> {
    let tls_addr = addr.replace("http://", "https://");
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_only()
        .enable_http2()
        .build();
    Channel::from_shared(tls_addr)?
        .connect_timeout(timeout)
        .timeout(timeout)
        .connect_with_connector(https_connector)
        .await
        .context("Failed to connect via TLS")
}
