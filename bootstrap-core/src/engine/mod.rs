//! Bootstrap protocol engine.
//!
//! One attempt runs at a time. An attempt opens a channel, fetches a
//! challenge, signs it with the hardware key, rotates the enrollment key,
//! builds a CSR for it and submits everything to the controller. Each step
//! is awaited before the next starts. Whatever happens, the consumer hears
//! about it exactly once and the engine returns to [`AttemptState::Idle`].
//!
//! A trigger that arrives while an attempt is in flight is dropped, not
//! queued. An attempt whose task is aborted still erases the enrollment key
//! and reports a failure for the step it was interrupted in.

mod observer;
mod state;

pub use observer::{AttemptEvent, AttemptObserver, TracingObserver};
pub use state::AttemptState;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bootstrap_auth::cert::summarize_certificate;
use bootstrap_auth::csr::{self, CertType, DEFAULT_VALIDITY};
use bootstrap_auth::identity::EcdsaSignature;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{
    Challenge, ChallengeResponse, ChannelConnector, ChannelError, KeyType, SecureChannel,
    SignedCertificate,
};
use crate::consumer::BootstrapConsumer;
use crate::custodian::{CustodianError, KeyCustodian, SigningKeyHandle};
use crate::error::{AttemptFailure, ErrorKind};
use crate::identity::{DeviceId, DeviceIdentityProvider};

/// Default alias of the hardware identity key.
pub const DEFAULT_HARDWARE_ALIAS: &str = "hwKey";
/// Default alias of the enrollment key.
pub const DEFAULT_ENROLLMENT_ALIAS: &str = "csrKey";

/// What the engine asks the controller for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub hardware_alias: String,
    pub enrollment_alias: String,
    pub cert_type: CertType,
    /// Requested certificate validity; the controller may shorten it.
    pub validity: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hardware_alias: DEFAULT_HARDWARE_ALIAS.to_string(),
            enrollment_alias: DEFAULT_ENROLLMENT_ALIAS.to_string(),
            cert_type: CertType::Default,
            validity: DEFAULT_VALIDITY,
        }
    }
}

/// A successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReceipt {
    pub certificate: SignedCertificate,
    pub enrollment_alias: String,
    /// Expiry of the certificate, when it parses as X.509.
    pub not_after: Option<DateTime<Utc>>,
}

pub type AttemptOutcome = Result<BootstrapReceipt, ErrorKind>;

/// Runs bootstrap attempts against a controller. Cheap to clone.
pub struct BootstrapEngine<C: ChannelConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: ChannelConnector> Clone for BootstrapEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`BootstrapEngine`].
pub struct EngineBuilder<C: ChannelConnector> {
    connector: C,
    custodian: Arc<KeyCustodian>,
    identity: Arc<dyn DeviceIdentityProvider>,
    consumer: Arc<dyn BootstrapConsumer>,
    observer: Arc<dyn AttemptObserver>,
    config: EngineConfig,
}

impl<C: ChannelConnector> EngineBuilder<C> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`TracingObserver`].
    pub fn observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> BootstrapEngine<C> {
        let (state, _) = watch::channel(AttemptState::Idle);
        BootstrapEngine {
            inner: Arc::new(Inner {
                connector: self.connector,
                custodian: self.custodian,
                identity: self.identity,
                consumer: self.consumer,
                observer: self.observer,
                config: self.config,
                in_flight: AtomicBool::new(false),
                unreported: AtomicBool::new(false),
                enrollment_touched: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                state,
            }),
        }
    }
}

impl<C: ChannelConnector> BootstrapEngine<C> {
    pub fn builder(
        connector: C,
        custodian: Arc<KeyCustodian>,
        identity: Arc<dyn DeviceIdentityProvider>,
        consumer: Arc<dyn BootstrapConsumer>,
    ) -> EngineBuilder<C> {
        EngineBuilder {
            connector,
            custodian,
            identity,
            consumer,
            observer: Arc::new(TracingObserver),
            config: EngineConfig::default(),
        }
    }

    /// Run one attempt on the current task.
    ///
    /// Returns `None` without doing anything if an attempt is already in
    /// flight.
    pub async fn run_once(&self) -> Option<AttemptOutcome> {
        let guard = InFlightGuard::acquire(&self.inner)?;
        let outcome = guard.inner.attempt().await;
        drop(guard);
        Some(outcome)
    }

    /// Start an attempt on a tokio worker.
    ///
    /// The in-flight check happens before spawning, so of two racing calls
    /// exactly one gets a handle. Returns `None` if an attempt is already in
    /// flight.
    pub fn trigger(&self) -> Option<JoinHandle<AttemptOutcome>> {
        let guard = InFlightGuard::acquire(&self.inner)?;
        Some(tokio::spawn(async move {
            let outcome = guard.inner.attempt().await;
            drop(guard);
            outcome
        }))
    }

    /// Watch the engine's state.
    pub fn state(&self) -> watch::Receiver<AttemptState> {
        self.inner.state.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Triggers discarded because an attempt was in flight.
    pub fn dropped_triggers(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

struct Inner<C: ChannelConnector> {
    connector: C,
    custodian: Arc<KeyCustodian>,
    identity: Arc<dyn DeviceIdentityProvider>,
    consumer: Arc<dyn BootstrapConsumer>,
    observer: Arc<dyn AttemptObserver>,
    config: EngineConfig,
    in_flight: AtomicBool,
    /// Set while an attempt has started but the consumer has not heard back.
    unreported: AtomicBool,
    /// The enrollment alias may have been mutated by the current attempt.
    enrollment_touched: AtomicBool,
    dropped: AtomicU64,
    state: watch::Sender<AttemptState>,
}

/// Holds the in-flight flag for one attempt. Dropping it returns the engine
/// to `Idle`, even if the attempt's task is aborted; an aborted attempt is
/// finished as a failure first.
struct InFlightGuard<C: ChannelConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: ChannelConnector> InFlightGuard<C> {
    fn acquire(inner: &Arc<Inner<C>>) -> Option<Self> {
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let dropped_total = inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            inner.observer.observe(&AttemptEvent::TriggerDropped {
                state: *inner.state.borrow(),
                dropped_total,
            });
            return None;
        }
        Some(Self {
            inner: Arc::clone(inner),
        })
    }
}

impl<C: ChannelConnector> Drop for InFlightGuard<C> {
    fn drop(&mut self) {
        if self.inner.unreported.swap(false, Ordering::AcqRel) {
            self.inner.abandon();
        }
        self.inner.transition(AttemptState::Idle);
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl<C: ChannelConnector> Inner<C> {
    async fn attempt(&self) -> AttemptOutcome {
        let device_id = self.identity.device_id();
        self.enrollment_touched.store(false, Ordering::Release);
        self.unreported.store(true, Ordering::Release);
        self.observer.observe(&AttemptEvent::Started {
            device_id: device_id.clone(),
        });

        let result = self.drive(&device_id).await;
        self.unreported.store(false, Ordering::Release);
        match result {
            Ok(receipt) => {
                self.observer.observe(&AttemptEvent::Completed {
                    enrollment_alias: receipt.enrollment_alias.clone(),
                    not_after: receipt.not_after,
                });
                self.transition(AttemptState::Completed);
                self.consumer
                    .on_bootstrapped(receipt.certificate.clone(), &receipt.enrollment_alias);
                Ok(receipt)
            }
            Err(failure) => {
                let kind = failure.kind;
                self.fail(failure);
                Err(kind)
            }
        }
    }

    /// Erase the enrollment key if needed, then report `failure`.
    fn fail(&self, failure: AttemptFailure) {
        if self.enrollment_touched.swap(false, Ordering::AcqRel) {
            self.discard_enrollment_key();
        }
        let kind = failure.kind;
        self.observer.observe(&AttemptEvent::Failed(failure));
        self.transition(AttemptState::Failed(kind));
        self.consumer.on_bootstrap_failed(kind);
    }

    /// Finish an attempt whose future was dropped mid-step.
    fn abandon(&self) {
        let kind = match *self.state.borrow() {
            AttemptState::Signing => ErrorKind::SigningError,
            AttemptState::RequestBuilding => ErrorKind::RequestBuildError,
            AttemptState::ResponseSubmitted => ErrorKind::SubmissionError,
            _ => ErrorKind::ConnectionError,
        };
        self.fail(self.failure(kind, "attempt aborted"));
    }

    /// The happy path. Any `Err` ends the attempt at the current state.
    ///
    /// `enrollment_touched` is set as soon as the enrollment alias may have
    /// been mutated, so a failure or abort knows to clean it up.
    async fn drive(&self, device_id: &DeviceId) -> Result<BootstrapReceipt, AttemptFailure> {
        self.transition(AttemptState::Connecting);
        let channel = self
            .connector
            .connect()
            .await
            .map_err(|e| self.failure(ErrorKind::ConnectionError, e))?;

        self.transition(AttemptState::ChallengeRequested);
        let challenge = channel
            .request_challenge(device_id)
            .await
            .map_err(|e| self.channel_failure(e, ErrorKind::ConnectionError))?;
        if challenge.value().is_empty() {
            return Err(self.failure(
                ErrorKind::RejectedByController,
                "controller sent an empty challenge",
            ));
        }

        self.transition(AttemptState::Signing);
        let (hardware, signature) = self.sign_challenge(&challenge)?;

        self.transition(AttemptState::RequestBuilding);
        self.enrollment_touched.store(true, Ordering::Release);
        let config = &self.config;
        let enrollment = self
            .custodian
            .rotate_enrollment_key_pair(&config.enrollment_alias, hardware.algorithm())
            .map_err(|e| self.failure(ErrorKind::RequestBuildError, e))?;
        let request = csr::build(
            device_id.as_str(),
            enrollment.handle.public_key(),
            config.cert_type,
            config.validity,
            self.custodian.signer(&enrollment.handle),
        )
        .map_err(|e| self.failure(ErrorKind::RequestBuildError, e))?;

        self.transition(AttemptState::ResponseSubmitted);
        let response = ChallengeResponse {
            device_id: device_id.clone(),
            challenge,
            signature,
            csr: request,
        };
        let certificate = channel
            .submit_response(&response)
            .await
            .map_err(|e| self.channel_failure(e, ErrorKind::SubmissionError))?;

        if certificate.der().is_empty() {
            return Err(self.failure(
                ErrorKind::RejectedByController,
                "controller returned an empty certificate",
            ));
        }
        // Opaque certificates are accepted; parseable ones must bind the
        // enrollment key.
        let not_after = match summarize_certificate(certificate.der()) {
            Ok(summary) if !summary.binds(enrollment.handle.public_key()) => {
                return Err(self.failure(
                    ErrorKind::RejectedByController,
                    "issued certificate does not bind the enrollment key",
                ));
            }
            Ok(summary) => Some(summary.not_after),
            Err(_) => None,
        };

        Ok(BootstrapReceipt {
            certificate,
            enrollment_alias: config.enrollment_alias.clone(),
            not_after,
        })
    }

    /// Sign the challenge with the hardware key, retrying a failed signature
    /// once.
    fn sign_challenge(
        &self,
        challenge: &Challenge,
    ) -> Result<(SigningKeyHandle, EcdsaSignature), AttemptFailure> {
        let handle = self
            .custodian
            .hardware_key(&self.config.hardware_alias)
            .map_err(|e| self.signing_failure(e))?;

        let expected = KeyType::for_algorithm(handle.algorithm());
        if challenge.key_type() != expected {
            return Err(self.failure(
                ErrorKind::SigningError,
                format!(
                    "controller requested {:?}, hardware key is {}",
                    challenge.key_type(),
                    handle.algorithm()
                ),
            ));
        }

        let signature = match self.custodian.sign(challenge.value(), &handle) {
            Ok(signature) => signature,
            Err(e @ CustodianError::SigningFailed { .. }) => {
                self.observer.observe(&AttemptEvent::SignRetry {
                    detail: e.to_string(),
                });
                self.custodian
                    .sign(challenge.value(), &handle)
                    .map_err(|e| self.signing_failure(e))?
            }
            Err(e) => return Err(self.signing_failure(e)),
        };
        Ok((handle, signature))
    }

    fn discard_enrollment_key(&self) {
        let alias = &self.config.enrollment_alias;
        if let Err(e) = self.custodian.erase(alias) {
            self.observer.observe(&AttemptEvent::CleanupFailed {
                alias: alias.clone(),
                detail: e.to_string(),
            });
        }
    }

    fn transition(&self, to: AttemptState) {
        let from = self.state.send_replace(to);
        self.observer.observe(&AttemptEvent::Transition { from, to });
    }

    fn failure(&self, kind: ErrorKind, detail: impl std::fmt::Display) -> AttemptFailure {
        AttemptFailure {
            kind,
            state: *self.state.borrow(),
            detail: detail.to_string(),
        }
    }

    fn signing_failure(&self, e: CustodianError) -> AttemptFailure {
        let kind = match e {
            CustodianError::KeyUnavailable { .. } => ErrorKind::IdentityUnavailable,
            _ => ErrorKind::SigningError,
        };
        self.failure(kind, e)
    }

    /// Rejections are always `RejectedByController`; transport failures map
    /// to the kind of the step they happened in.
    fn channel_failure(&self, e: ChannelError, transport_kind: ErrorKind) -> AttemptFailure {
        let kind = match e {
            ChannelError::Rejected(_) => ErrorKind::RejectedByController,
            _ => transport_kind,
        };
        self.failure(kind, e)
    }
}
