//! PKCS#10 request encoding over an external signer.

use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, KeyPair, RemoteKeyPair, SignatureAlgorithm,
};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

use super::CsrError;
use crate::identity::{EcdsaSignature, KeyAlgorithm, PrivateKey, PublicKey};

/// Validity requested when the caller does not choose one.
///
/// The controller treats the requested validity as a hint and may issue a
/// shorter certificate.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(10_000);

/// Certificate type requested from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertType {
    /// Gateway identity certificate.
    #[default]
    Default,
    /// Certificate for the controller's VPN service.
    Vpn,
}

impl CertType {
    /// Wire value of this certificate type.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::Vpn => 1,
        }
    }
}

/// Signs CSR bytes on behalf of a key the builder never sees.
pub trait CsrSigner: Send + Sync {
    /// Algorithm of the signing key.
    fn algorithm(&self) -> KeyAlgorithm;

    /// Public half of the signing key.
    fn public_key(&self) -> PublicKey;

    /// Sign the DER-encoded `CertificationRequestInfo`.
    fn sign(&self, message: &[u8]) -> Result<EcdsaSignature, CsrError>;
}

impl CsrSigner for PrivateKey {
    fn algorithm(&self) -> KeyAlgorithm {
        PrivateKey::algorithm(self)
    }

    fn public_key(&self) -> PublicKey {
        PrivateKey::public_key(self)
    }

    fn sign(&self, message: &[u8]) -> Result<EcdsaSignature, CsrError> {
        Ok(PrivateKey::sign(self, message))
    }
}

/// A DER-encoded certificate signing request and the parameters it was built for.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateSigningRequest {
    device_id: String,
    cert_type: CertType,
    validity: Duration,
    der: Vec<u8>,
}

impl CertificateSigningRequest {
    /// Device identifier carried as the subject common name.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Requested certificate type.
    #[must_use]
    pub fn cert_type(&self) -> CertType {
        self.cert_type
    }

    /// Requested validity.
    #[must_use]
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// The PKCS#10 request in DER form.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

impl std::fmt::Debug for CertificateSigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateSigningRequest")
            .field("device_id", &self.device_id)
            .field("cert_type", &self.cert_type)
            .field("validity", &self.validity)
            .field("der_len", &self.der.len())
            .finish()
    }
}

/// Adapts a [`CsrSigner`] to rcgen's remote key interface.
struct RemoteSigner {
    signer: Arc<dyn CsrSigner>,
    public_key: Vec<u8>,
    algorithm: &'static SignatureAlgorithm,
}

impl RemoteKeyPair for RemoteSigner {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        let signature = self
            .signer
            .sign(msg)
            .map_err(|_| rcgen::Error::RemoteKeyError)?;
        signature.to_der().map_err(|_| rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.algorithm
    }
}

fn signature_algorithm(algorithm: KeyAlgorithm) -> &'static SignatureAlgorithm {
    match algorithm {
        KeyAlgorithm::EcdsaP256Sha256 => &rcgen::PKCS_ECDSA_P256_SHA256,
    }
}

/// Build a certificate signing request for `public_key`.
///
/// `signer` must hold the private half of `public_key`; the request is
/// re-parsed and its signature verified before it is returned.
///
/// # Errors
///
/// Returns `CsrError::InvalidInput` for an empty device ID, a zero validity,
/// or a signer holding a different key.
/// Returns `CsrError::Signing` if the signer fails.
/// Returns `CsrError::Encoding` if the request cannot be serialized or does
/// not verify against `public_key`.
pub fn build(
    device_id: &str,
    public_key: &PublicKey,
    cert_type: CertType,
    validity: Duration,
    signer: Arc<dyn CsrSigner>,
) -> Result<CertificateSigningRequest, CsrError> {
    if device_id.is_empty() {
        return Err(CsrError::InvalidInput("device ID is empty".to_string()));
    }
    if validity.is_zero() {
        return Err(CsrError::InvalidInput("validity must be non-zero".to_string()));
    }
    if signer.public_key() != *public_key {
        return Err(CsrError::InvalidInput(
            "signer does not hold the supplied public key".to_string(),
        ));
    }

    let remote = RemoteSigner {
        algorithm: signature_algorithm(signer.algorithm()),
        public_key: public_key.to_sec1_bytes(),
        signer,
    };
    let key_pair =
        KeyPair::from_remote(Box::new(remote)).map_err(|e| CsrError::Encoding(e.to_string()))?;

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, device_id);

    let request = params.serialize_request(&key_pair).map_err(|e| match e {
        rcgen::Error::RemoteKeyError => {
            CsrError::Signing("signer rejected the request".to_string())
        }
        other => CsrError::Encoding(other.to_string()),
    })?;
    let der: &[u8] = request.der().as_ref();

    verify_request(der, public_key)?;

    Ok(CertificateSigningRequest {
        device_id: device_id.to_string(),
        cert_type,
        validity,
        der: der.to_vec(),
    })
}

/// Check that `der` embeds `public_key` and is signed by it.
fn verify_request(der: &[u8], public_key: &PublicKey) -> Result<(), CsrError> {
    let (_, request) = X509CertificationRequest::from_der(der)
        .map_err(|e| CsrError::Encoding(format!("request does not parse: {:?}", e)))?;

    let embedded = request
        .certification_request_info
        .subject_pki
        .subject_public_key
        .data
        .to_vec();
    if embedded != public_key.to_sec1_bytes() {
        return Err(CsrError::Encoding(
            "embedded public key does not match".to_string(),
        ));
    }

    request
        .verify_signature()
        .map_err(|e| CsrError::Encoding(format!("request signature does not verify: {:?}", e)))
}
