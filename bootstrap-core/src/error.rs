//! Terminal failure taxonomy of a bootstrap attempt.

use serde::{Deserialize, Serialize};

use crate::engine::AttemptState;

/// Why a bootstrap attempt ended without a certificate.
///
/// Every failure inside the engine is translated to one of these kinds
/// before it reaches a consumer or caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Secure channel setup or challenge fetch failed in transport.
    #[error("connection error")]
    ConnectionError,
    /// Hardware identity key is missing or corrupt; needs re-provisioning.
    #[error("hardware identity unavailable")]
    IdentityUnavailable,
    /// Challenge signing failed after its single retry, or the controller
    /// asked for a key type the hardware key cannot produce.
    #[error("signing error")]
    SigningError,
    /// Enrollment key rotation or CSR construction failed.
    #[error("request build error")]
    RequestBuildError,
    /// Transport failed while submitting the response.
    #[error("submission error")]
    SubmissionError,
    /// Controller refused the challenge, response or CSR.
    #[error("rejected by controller")]
    RejectedByController,
}

/// Full detail of a failed attempt, reported to the observer.
///
/// Consumers only see the [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} while {state}: {detail}")]
pub struct AttemptFailure {
    pub kind: ErrorKind,
    /// State the engine was in when the failure happened.
    pub state: AttemptState,
    pub detail: String,
}
