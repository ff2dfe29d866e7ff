//! Attempt states and their ordering.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Progress of the current bootstrap attempt.
///
/// A successful attempt walks
/// `Idle → Connecting → ChallengeRequested → Signing → RequestBuilding →
/// ResponseSubmitted → Completed → Idle`. `Failed` is reachable from every
/// non-terminal state and also returns to `Idle` once reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    #[default]
    Idle,
    Connecting,
    ChallengeRequested,
    Signing,
    RequestBuilding,
    ResponseSubmitted,
    Completed,
    Failed(ErrorKind),
}

impl AttemptState {
    /// Whether the attempt has reached `Completed` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::ChallengeRequested => "challenge_requested",
            Self::Signing => "signing",
            Self::RequestBuilding => "request_building",
            Self::ResponseSubmitted => "response_submitted",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed ({kind})"),
            other => f.write_str(other.as_str()),
        }
    }
}
