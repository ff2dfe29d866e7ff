//! Key custodian: the only component that touches the secure key store.
//!
//! The custodian owns two kinds of keys:
//! - the long-lived hardware identity key, which it signs challenges with but
//!   never creates during a bootstrap attempt and never deletes;
//! - the per-attempt enrollment key, which it rotates (erase, verify, then
//!   generate) under a lock so two attempts never interleave store mutations.
//!
//! Private key material stays inside the store. Callers get
//! [`SigningKeyHandle`]s and signatures.

use std::sync::{Arc, Mutex};

use bootstrap_auth::csr::{CsrError, CsrSigner};
use bootstrap_auth::identity::{EcdsaSignature, Fingerprint, KeyAlgorithm, PublicKey};
use bootstrap_auth::store::{KeyStore, StoreError};

/// Errors surfaced by the custodian.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CustodianError {
    /// Hardware key missing or corrupt. Not recoverable without re-provisioning.
    #[error("key {alias:?} unavailable: {reason}")]
    KeyUnavailable { alias: String, reason: String },

    /// The crypto provider failed to sign. Retryable.
    #[error("signing with key {alias:?} failed: {reason}")]
    SigningFailed { alias: String, reason: String },

    /// The secure store could not be reached.
    #[error("key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    /// The store was reachable but refused to generate the key.
    #[error("generating key {alias:?} failed: {reason}")]
    GenerationFailed { alias: String, reason: String },

    #[error("erasing key {alias:?} failed: {reason}")]
    EraseFailed { alias: String, reason: String },
}

/// Alias-bound handle to a key held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyHandle {
    alias: String,
    public_key: PublicKey,
}

impl SigningKeyHandle {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.public_key.algorithm()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_public_key(&self.public_key)
    }
}

/// Outcome of erasing the previous enrollment key before generating a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraseReport {
    /// Erase succeeded and a follow-up lookup found nothing.
    Clean,
    /// The store reported an error while erasing or verifying.
    Failed(StoreError),
    /// Erase returned success but the key is still there.
    Survived,
}

impl EraseReport {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// A freshly generated enrollment key.
#[derive(Debug, Clone)]
pub struct EnrollmentKeyPair {
    pub handle: SigningKeyHandle,
    /// How erasing the previous key under the alias went.
    pub erase_report: EraseReport,
}

/// Result of [`KeyCustodian::provision_hardware_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioning {
    /// A key already existed and was left untouched.
    Existing(PublicKey),
    Created(PublicKey),
}

impl Provisioning {
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Self::Existing(key) | Self::Created(key) => key,
        }
    }
}

pub struct KeyCustodian {
    store: Arc<dyn KeyStore>,
    mutation: Mutex<()>,
}

impl KeyCustodian {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            mutation: Mutex::new(()),
        }
    }

    /// Handle for the hardware identity key under `alias`.
    ///
    /// # Errors
    ///
    /// `KeyUnavailable` if the key is missing or corrupt; `SigningFailed` for
    /// any other store failure.
    pub fn hardware_key(&self, alias: &str) -> Result<SigningKeyHandle, CustodianError> {
        match self.store.lookup(alias) {
            Ok(Some(public_key)) => Ok(SigningKeyHandle {
                alias: alias.to_string(),
                public_key,
            }),
            Ok(None) => Err(CustodianError::KeyUnavailable {
                alias: alias.to_string(),
                reason: "no key provisioned".to_string(),
            }),
            Err(e) => Err(signing_error(alias, e)),
        }
    }

    /// Public half of the hardware key, if one is provisioned.
    pub fn hardware_public_key(&self, alias: &str) -> Result<Option<PublicKey>, CustodianError> {
        self.store
            .lookup(alias)
            .map_err(|e| CustodianError::KeyStoreUnavailable(e.to_string()))
    }

    /// Create the hardware key under `alias` unless one already exists.
    ///
    /// An existing key is never replaced.
    pub fn provision_hardware_key(
        &self,
        alias: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<Provisioning, CustodianError> {
        let _guard = self.lock()?;
        match self.store.lookup(alias) {
            Ok(Some(existing)) => return Ok(Provisioning::Existing(existing)),
            Ok(None) => {}
            Err(e) => return Err(generation_error(alias, e)),
        }
        self.store
            .generate(alias, algorithm)
            .map(Provisioning::Created)
            .map_err(|e| generation_error(alias, e))
    }

    /// Sign `challenge` with the key behind `handle`.
    pub fn sign(
        &self,
        challenge: &[u8],
        handle: &SigningKeyHandle,
    ) -> Result<EcdsaSignature, CustodianError> {
        self.store
            .sign(&handle.alias, challenge)
            .map_err(|e| signing_error(&handle.alias, e))
    }

    /// Replace whatever key lives under `alias` with a fresh one.
    ///
    /// The previous key is erased and the erase verified by lookup. A failed
    /// or unverified erase is reported in the result rather than aborting;
    /// if the old key really survived, generation fails with `AlreadyExists`.
    ///
    /// # Errors
    ///
    /// `KeyStoreUnavailable` if the store cannot be reached, otherwise
    /// `GenerationFailed`.
    pub fn rotate_enrollment_key_pair(
        &self,
        alias: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<EnrollmentKeyPair, CustodianError> {
        let _guard = self.lock()?;

        let erase_report = self.erase_verified(alias);
        if !erase_report.is_clean() {
            tracing::warn!(
                alias = %alias,
                report = ?erase_report,
                "Previous enrollment key not cleanly erased"
            );
        }

        let public_key = self
            .store
            .generate(alias, algorithm)
            .map_err(|e| generation_error(alias, e))?;

        tracing::debug!(
            alias = %alias,
            fingerprint = %Fingerprint::from_public_key(&public_key),
            "Generated enrollment key"
        );

        Ok(EnrollmentKeyPair {
            handle: SigningKeyHandle {
                alias: alias.to_string(),
                public_key,
            },
            erase_report,
        })
    }

    /// Erase the key under `alias`. Erasing a missing key is not an error.
    pub fn erase(&self, alias: &str) -> Result<(), CustodianError> {
        let _guard = self.lock()?;
        self.store
            .erase(alias)
            .map_err(|e| CustodianError::EraseFailed {
                alias: alias.to_string(),
                reason: e.to_string(),
            })
    }

    /// A CSR signer that signs through the store with the key behind `handle`.
    pub fn signer(&self, handle: &SigningKeyHandle) -> Arc<dyn CsrSigner> {
        Arc::new(StoreSigner {
            store: Arc::clone(&self.store),
            handle: handle.clone(),
        })
    }

    fn erase_verified(&self, alias: &str) -> EraseReport {
        if let Err(e) = self.store.erase(alias) {
            return EraseReport::Failed(e);
        }
        match self.store.lookup(alias) {
            Ok(None) => EraseReport::Clean,
            Ok(Some(_)) => EraseReport::Survived,
            Err(e) => EraseReport::Failed(e),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, CustodianError> {
        self.mutation.lock().map_err(|_| {
            CustodianError::KeyStoreUnavailable("key mutation lock poisoned".to_string())
        })
    }
}

impl std::fmt::Debug for KeyCustodian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCustodian").finish_non_exhaustive()
    }
}

fn signing_error(alias: &str, e: StoreError) -> CustodianError {
    match e {
        StoreError::NotFound(_) | StoreError::Corrupt(_) => CustodianError::KeyUnavailable {
            alias: alias.to_string(),
            reason: e.to_string(),
        },
        other => CustodianError::SigningFailed {
            alias: alias.to_string(),
            reason: other.to_string(),
        },
    }
}

fn generation_error(alias: &str, e: StoreError) -> CustodianError {
    match e {
        StoreError::Unavailable(_) => CustodianError::KeyStoreUnavailable(e.to_string()),
        other => CustodianError::GenerationFailed {
            alias: alias.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Signs CSRs through the key store.
struct StoreSigner {
    store: Arc<dyn KeyStore>,
    handle: SigningKeyHandle,
}

impl CsrSigner for StoreSigner {
    fn algorithm(&self) -> KeyAlgorithm {
        self.handle.algorithm()
    }

    fn public_key(&self) -> PublicKey {
        self.handle.public_key.clone()
    }

    fn sign(&self, message: &[u8]) -> Result<EcdsaSignature, CsrError> {
        self.store
            .sign(&self.handle.alias, message)
            .map_err(|e| CsrError::Signing(e.to_string()))
    }
}
