//! Certificate utilities for X.509 parsing.
//!
//! # Security
//!
//! - Input is limited to 16KB to prevent DoS
//! - The x509_parser library handles ASN.1 parsing safely

use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::prelude::*;

use crate::identity::PublicKey;

/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// Errors that can occur during certificate parsing.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse X.509 certificate: {0}")]
    ParseError(String),

    #[error("certificate validity out of range")]
    InvalidValidity,
}

/// Fields of an issued certificate the gateway acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    /// Raw subject public key bytes (SEC1 for EC keys).
    pub subject_public_key: Vec<u8>,
    /// First subject common name, if any.
    pub common_name: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateSummary {
    /// Whether the certificate binds `key`.
    #[must_use]
    pub fn binds(&self, key: &PublicKey) -> bool {
        self.subject_public_key == key.to_sec1_bytes()
    }
}

fn parse(cert_der: &[u8]) -> Result<X509Certificate<'_>, CertError> {
    if cert_der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(cert_der.len()));
    }

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CertError::ParseError(format!("{:?}", e)))?;
    Ok(cert)
}

fn to_utc(time: &ASN1Time) -> Result<DateTime<Utc>, CertError> {
    DateTime::from_timestamp(time.timestamp(), 0).ok_or(CertError::InvalidValidity)
}

/// Extract raw public key bytes from a DER-encoded X.509 certificate.
///
/// # Errors
///
/// Returns `CertError::TooLarge` if certificate exceeds 16KB.
/// Returns `CertError::ParseError` if the certificate is malformed.
pub fn extract_public_key_from_cert(cert_der: &[u8]) -> Result<Vec<u8>, CertError> {
    let cert = parse(cert_der)?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}

/// Summarize a DER-encoded X.509 certificate.
///
/// # Errors
///
/// Same as [`extract_public_key_from_cert`], plus `CertError::InvalidValidity`
/// when a validity bound cannot be represented.
pub fn summarize_certificate(cert_der: &[u8]) -> Result<CertificateSummary, CertError> {
    let cert = parse(cert_der)?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let validity = cert.validity();
    Ok(CertificateSummary {
        subject_public_key: cert.public_key().subject_public_key.data.to_vec(),
        common_name,
        not_before: to_utc(&validity.not_before)?,
        not_after: to_utc(&validity.not_after)?,
    })
}
