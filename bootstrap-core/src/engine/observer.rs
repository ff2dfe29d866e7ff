//! Structured observability hook for the engine.

use chrono::{DateTime, Utc};

use super::AttemptState;
use crate::error::AttemptFailure;
use crate::identity::DeviceId;

/// Something worth recording about an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    Started {
        device_id: DeviceId,
    },
    Transition {
        from: AttemptState,
        to: AttemptState,
    },
    /// First signing try failed and is being retried.
    SignRetry {
        detail: String,
    },
    /// Enrollment key cleanup after a failure did not succeed.
    CleanupFailed {
        alias: String,
        detail: String,
    },
    Failed(AttemptFailure),
    Completed {
        enrollment_alias: String,
        not_after: Option<DateTime<Utc>>,
    },
    /// A trigger arrived while an attempt was in flight and was discarded.
    TriggerDropped {
        state: AttemptState,
        dropped_total: u64,
    },
}

/// Receives [`AttemptEvent`]s as the engine runs.
///
/// Called inline on the attempt's task; implementations must return quickly.
pub trait AttemptObserver: Send + Sync {
    fn observe(&self, event: &AttemptEvent);
}

/// Emits every event as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AttemptObserver for TracingObserver {
    fn observe(&self, event: &AttemptEvent) {
        match event {
            AttemptEvent::Started { device_id } => {
                tracing::info!(device_id = %device_id, "Bootstrap attempt started");
            }
            AttemptEvent::Transition { from, to } => {
                tracing::debug!(from = %from, to = %to, "Bootstrap state changed");
            }
            AttemptEvent::SignRetry { detail } => {
                tracing::warn!(error = %detail, "Challenge signing failed, retrying once");
            }
            AttemptEvent::CleanupFailed { alias, detail } => {
                tracing::warn!(alias = %alias, error = %detail, "Failed to erase enrollment key");
            }
            AttemptEvent::Failed(failure) => {
                tracing::warn!(
                    kind = %failure.kind,
                    state = %failure.state,
                    error = %failure.detail,
                    "Bootstrap attempt failed"
                );
            }
            AttemptEvent::Completed {
                enrollment_alias,
                not_after,
            } => {
                tracing::info!(
                    alias = %enrollment_alias,
                    not_after = ?not_after,
                    "Bootstrap attempt completed"
                );
            }
            AttemptEvent::TriggerDropped {
                state,
                dropped_total,
            } => {
                tracing::debug!(
                    state = %state,
                    dropped_total,
                    "Attempt already in flight, trigger dropped"
                );
            }
        }
    }
}
