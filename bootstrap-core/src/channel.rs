//! Secure channel collaborator.
//!
//! The engine never sees transport details: a [`ChannelConnector`] opens a
//! channel to the controller (TLS, trust roots, deadlines are its concern),
//! and the resulting [`SecureChannel`] carries the two protocol exchanges.

use async_trait::async_trait;
use bootstrap_auth::csr::CertificateSigningRequest;
use bootstrap_auth::identity::{EcdsaSignature, KeyAlgorithm};

use crate::identity::DeviceId;

/// Key type the controller expects the challenge to be signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Challenge echoed back unsigned.
    Echo,
    SoftwareRsaSha256,
    SoftwareEcdsaSha256,
}

impl KeyType {
    /// Key type matching a key of `algorithm`.
    pub fn for_algorithm(algorithm: KeyAlgorithm) -> Self {
        match algorithm {
            KeyAlgorithm::EcdsaP256Sha256 => Self::SoftwareEcdsaSha256,
        }
    }
}

/// Single-use challenge issued by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    key_type: KeyType,
    value: Vec<u8>,
}

impl Challenge {
    pub fn new(key_type: KeyType, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key_type,
            value: value.into(),
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Everything submitted to the controller in exchange for a certificate.
#[derive(Debug, Clone)]
pub struct ChallengeResponse {
    pub device_id: DeviceId,
    pub challenge: Challenge,
    /// Challenge signed with the hardware key.
    pub signature: EcdsaSignature,
    /// Request for the enrollment key.
    pub csr: CertificateSigningRequest,
}

/// DER-encoded certificate issued by the controller.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedCertificate(Vec<u8>);

impl SignedCertificate {
    pub fn new(der: impl Into<Vec<u8>>) -> Self {
        Self(der.into())
    }

    pub fn der(&self) -> &[u8] {
        &self.0
    }

    pub fn into_der(self) -> Vec<u8> {
        self.0
    }
}

impl std::fmt::Debug for SignedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignedCertificate({} bytes)", self.0.len())
    }
}

/// Failure reported by a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// The exchange did not complete (connect, TLS, timeout, reset).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The controller answered and refused.
    #[error("rejected by controller: {0}")]
    Rejected(String),
}

/// An open channel to the controller.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    /// Ask the controller for a challenge for `device_id`.
    async fn request_challenge(&self, device_id: &DeviceId) -> Result<Challenge, ChannelError>;

    /// Submit the signed challenge and CSR; returns the issued certificate.
    async fn submit_response(
        &self,
        response: &ChallengeResponse,
    ) -> Result<SignedCertificate, ChannelError>;
}

/// Opens secure channels to the controller.
#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    type Channel: SecureChannel + 'static;

    async fn connect(&self) -> Result<Self::Channel, ChannelError>;
}
