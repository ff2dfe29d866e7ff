//! In-memory key store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{KeyStore, StoreError};
use crate::identity::{EcdsaSignature, KeyAlgorithm, PrivateKey, PublicKey};

/// Key store that keeps private keys in process memory.
///
/// Keys are lost on restart. Suitable for enrollment keys that are
/// regenerated on every bootstrap attempt, and for tests.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, PrivateKey>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an existing private key under `alias`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the alias is taken.
    pub fn insert(&self, alias: &str, key: PrivateKey) -> Result<PublicKey, StoreError> {
        let mut keys = self.keys()?;
        if keys.contains_key(alias) {
            return Err(StoreError::AlreadyExists(alias.to_string()));
        }
        let public_key = key.public_key();
        keys.insert(alias.to_string(), key);
        Ok(public_key)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys().map(|keys| keys.len()).unwrap_or(0)
    }

    /// Check if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys(&self) -> Result<MutexGuard<'_, HashMap<String, PrivateKey>>, StoreError> {
        self.keys
            .lock()
            .map_err(|_| StoreError::Unavailable("key map lock poisoned".to_string()))
    }
}

impl KeyStore for MemoryKeyStore {
    fn lookup(&self, alias: &str) -> Result<Option<PublicKey>, StoreError> {
        Ok(self.keys()?.get(alias).map(PrivateKey::public_key))
    }

    fn generate(&self, alias: &str, algorithm: KeyAlgorithm) -> Result<PublicKey, StoreError> {
        match algorithm {
            KeyAlgorithm::EcdsaP256Sha256 => self.insert(alias, PrivateKey::generate()),
        }
    }

    fn sign(&self, alias: &str, message: &[u8]) -> Result<EcdsaSignature, StoreError> {
        self.keys()?
            .get(alias)
            .map(|key| key.sign(message))
            .ok_or_else(|| StoreError::NotFound(alias.to_string()))
    }

    fn erase(&self, alias: &str) -> Result<(), StoreError> {
        self.keys()?.remove(alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_lookup_sign() {
        let store = MemoryKeyStore::new();
        let public_key = store.generate("hwKey", KeyAlgorithm::EcdsaP256Sha256).unwrap();

        assert_eq!(store.lookup("hwKey").unwrap(), Some(public_key.clone()));

        let signature = store.sign("hwKey", b"challenge").unwrap();
        assert!(public_key.verify(b"challenge", &signature));
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let store = MemoryKeyStore::new();
        store.generate("csrKey", KeyAlgorithm::EcdsaP256Sha256).unwrap();

        assert_eq!(
            store.generate("csrKey", KeyAlgorithm::EcdsaP256Sha256),
            Err(StoreError::AlreadyExists("csrKey".to_string()))
        );
    }

    #[test]
    fn test_sign_missing_alias() {
        let store = MemoryKeyStore::new();

        assert_eq!(
            store.sign("hwKey", b"challenge"),
            Err(StoreError::NotFound("hwKey".to_string()))
        );
    }

    #[test]
    fn test_erase_is_idempotent() {
        let store = MemoryKeyStore::new();
        store.generate("csrKey", KeyAlgorithm::EcdsaP256Sha256).unwrap();

        store.erase("csrKey").unwrap();
        store.erase("csrKey").unwrap();

        assert_eq!(store.lookup("csrKey").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_insert_existing_key() {
        let store = MemoryKeyStore::new();
        let key = PrivateKey::generate();
        let expected = key.public_key();

        assert_eq!(store.insert("hwKey", key).unwrap(), expected);
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.insert("hwKey", PrivateKey::generate()),
            Err(StoreError::AlreadyExists(_))
        ));
    }
}
