//! Secure key store collaborator.
//!
//! Keys are addressed by alias and never leave the store: callers get public
//! keys and signatures back, not private key material. Implementations decide
//! where keys live (memory, files, a secure element).
//!
//! `generate` never overwrites an existing alias. Rotating a key therefore
//! means `erase` followed by `generate`, which keeps stale material from
//! silently surviving a rotation.

mod memory;

pub use memory::MemoryKeyStore;

use std::sync::Arc;

use crate::identity::{EcdsaSignature, KeyAlgorithm, PublicKey};

/// Errors reported by a [`KeyStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No key is stored under the alias.
    #[error("no key stored under alias {0:?}")]
    NotFound(String),

    /// Key material exists but cannot be decoded.
    #[error("key material under alias {0:?} is corrupt")]
    Corrupt(String),

    /// A key already exists under the alias.
    #[error("a key already exists under alias {0:?}")]
    AlreadyExists(String),

    /// The backing store cannot be reached.
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    /// The crypto provider failed.
    #[error("crypto provider error: {0}")]
    Crypto(String),
}

/// Alias-keyed storage for asymmetric keys.
pub trait KeyStore: Send + Sync {
    /// Look up the public key stored under `alias`.
    ///
    /// Returns `Ok(None)` if no key exists.
    fn lookup(&self, alias: &str) -> Result<Option<PublicKey>, StoreError>;

    /// Generate a new keypair under `alias`.
    ///
    /// Fails with `StoreError::AlreadyExists` if the alias is taken.
    fn generate(&self, alias: &str, algorithm: KeyAlgorithm) -> Result<PublicKey, StoreError>;

    /// Sign `message` with the private key stored under `alias`.
    fn sign(&self, alias: &str, message: &[u8]) -> Result<EcdsaSignature, StoreError>;

    /// Remove the key stored under `alias`.
    ///
    /// Erasing an alias that holds no key succeeds.
    fn erase(&self, alias: &str) -> Result<(), StoreError>;
}

impl<T: KeyStore + ?Sized> KeyStore for Arc<T> {
    fn lookup(&self, alias: &str) -> Result<Option<PublicKey>, StoreError> {
        (**self).lookup(alias)
    }

    fn generate(&self, alias: &str, algorithm: KeyAlgorithm) -> Result<PublicKey, StoreError> {
        (**self).generate(alias, algorithm)
    }

    fn sign(&self, alias: &str, message: &[u8]) -> Result<EcdsaSignature, StoreError> {
        (**self).sign(alias, message)
    }

    fn erase(&self, alias: &str) -> Result<(), StoreError> {
        (**self).erase(alias)
    }
}
