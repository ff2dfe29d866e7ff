//! # Bootstrap Core
//!
//! Protocol logic for bootstrapping a gateway's identity with its controller:
//! prove possession of the hardware key, get a certificate for a fresh
//! enrollment key.
//!
//! All I/O is injected. The secure channel, key store, device identifier,
//! outcome consumer and observability sink are traits, so the engine runs
//! the same against a real controller and against test doubles.
//!
//! ## Modules
//!
//! - [`custodian`] - Hardware and enrollment key management
//! - [`engine`] - The attempt state machine
//! - [`trigger`] - Environment-change subscription
//! - [`channel`] - Secure channel collaborator
//! - [`consumer`] - Where outcomes go

pub mod channel;
pub mod consumer;
pub mod custodian;
pub mod engine;
pub mod error;
pub mod identity;
pub mod trigger;

pub use channel::{
    Challenge, ChallengeResponse, ChannelConnector, ChannelError, KeyType, SecureChannel,
    SignedCertificate,
};
pub use consumer::{BootstrapConsumer, ChannelConsumer, ConsumerEvent};
pub use custodian::{
    CustodianError, EnrollmentKeyPair, EraseReport, KeyCustodian, Provisioning, SigningKeyHandle,
};
pub use engine::{
    AttemptEvent, AttemptObserver, AttemptOutcome, AttemptState, BootstrapEngine,
    BootstrapReceipt, EngineBuilder, EngineConfig, TracingObserver, DEFAULT_ENROLLMENT_ALIAS,
    DEFAULT_HARDWARE_ALIAS,
};
pub use error::{AttemptFailure, ErrorKind};
pub use identity::{DeviceId, DeviceIdentityProvider};
pub use trigger::TriggerAdapter;
