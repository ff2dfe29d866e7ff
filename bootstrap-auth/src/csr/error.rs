//! CSR construction error types.

/// Errors that can occur while building a certificate signing request.
///
/// All variants indicate a programming or provisioning error upstream and are
/// not worth retrying with the same inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CsrError {
    /// An input cannot be represented in the request.
    #[error("invalid CSR input: {0}")]
    InvalidInput(String),

    /// The request could not be serialized or failed self-verification.
    #[error("CSR encoding failed: {0}")]
    Encoding(String),

    /// The signer could not produce a signature.
    #[error("CSR signer failed: {0}")]
    Signing(String),
}
