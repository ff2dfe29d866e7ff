//! Secure channel to the controller's `Bootstrapper` gRPC service.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bootstrap_core::{
    Challenge, ChallengeResponse, ChannelConnector, ChannelError, DeviceId, SecureChannel,
    SignedCertificate,
};
use bootstrap_proto::BootstrapperClient;
use tonic::transport::Channel;

use crate::convert;
use crate::tls;

/// Upper bound on a decoded controller reply.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Opens TLS channels to the controller.
///
/// Trust roots are read on every connect so a replaced bundle takes effect
/// on the next attempt without a restart.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    endpoint: String,
    trust_roots: PathBuf,
    timeout: Duration,
}

impl GrpcConnector {
    pub fn new(
        endpoint: impl Into<String>,
        trust_roots: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            trust_roots: trust_roots.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChannelConnector for GrpcConnector {
    type Channel = GrpcChannel;

    async fn connect(&self) -> Result<GrpcChannel, ChannelError> {
        let roots = tls::load_trust_roots(&self.trust_roots)
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let config =
            tls::client_config(roots).map_err(|e| ChannelError::Transport(format!("{e:#}")))?;
        let channel = tls::build_tls_channel(&self.endpoint, config, self.timeout)
            .await
            .map_err(|e| ChannelError::Transport(format!("{e:#}")))?;

        tracing::debug!(endpoint = %self.endpoint, "Connected to controller");
        Ok(GrpcChannel {
            client: BootstrapperClient::new(channel).max_decoding_message_size(MAX_MESSAGE_SIZE),
        })
    }
}

/// An open channel to the controller.
#[derive(Debug, Clone)]
pub struct GrpcChannel {
    client: BootstrapperClient<Channel>,
}

#[async_trait]
impl SecureChannel for GrpcChannel {
    async fn request_challenge(&self, device_id: &DeviceId) -> Result<Challenge, ChannelError> {
        let mut client = self.client.clone();
        let challenge = client
            .get_challenge(convert::gateway_id(device_id))
            .await
            .map_err(convert::classify_status)?
            .into_inner();
        convert::challenge_from_proto(challenge)
    }

    async fn submit_response(
        &self,
        response: &ChallengeResponse,
    ) -> Result<SignedCertificate, ChannelError> {
        let mut client = self.client.clone();
        let certificate = client
            .request_sign(convert::response_to_proto(response))
            .await
            .map_err(convert::classify_status)?
            .into_inner();
        Ok(convert::certificate_from_proto(certificate))
    }
}
