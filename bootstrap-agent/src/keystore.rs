//! File-backed key store.
//!
//! One PKCS#8 DER file per alias, `<dir>/<alias>.pk8`, readable by the owner
//! only. Keys survive restarts; that is what makes the hardware key a
//! stable device identity.

use std::io::ErrorKind as IoErrorKind;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bootstrap_auth::identity::{EcdsaSignature, KeyAlgorithm, PrivateKey, PublicKey};
use bootstrap_auth::store::{KeyStore, StoreError};

const KEY_EXTENSION: &str = "pk8";

/// Key store persisting private keys under a directory.
pub struct FileKeyStore {
    dir: PathBuf,
    // Serializes check-then-write in `generate`.
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    /// Open the store, creating `dir` (mode 0700) if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, &e))?;

        #[cfg(unix)]
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| unavailable(&dir, &e))?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, alias: &str) -> Result<PathBuf, StoreError> {
        validate_alias(alias)?;
        Ok(self.dir.join(format!("{alias}.{KEY_EXTENSION}")))
    }

    /// Read the private key under `alias`, `Ok(None)` if there is none.
    fn read(&self, alias: &str) -> Result<Option<PrivateKey>, StoreError> {
        let path = self.key_path(alias)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path, &e)),
        };
        PrivateKey::from_pkcs8_der(&bytes)
            .map(Some)
            .map_err(|_| StoreError::Corrupt(alias.to_string()))
    }

    fn write_new(&self, alias: &str, key: &PrivateKey) -> Result<(), StoreError> {
        use std::io::Write;

        let path = self.key_path(alias)?;
        let der = key
            .to_pkcs8_der()
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path).map_err(|e| {
            if e.kind() == IoErrorKind::AlreadyExists {
                StoreError::AlreadyExists(alias.to_string())
            } else {
                unavailable(&path, &e)
            }
        })?;
        file.write_all(der.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| unavailable(&path, &e))?;

        #[cfg(unix)]
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| unavailable(&path, &e))?;

        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn lookup(&self, alias: &str) -> Result<Option<PublicKey>, StoreError> {
        Ok(self.read(alias)?.map(|key| key.public_key()))
    }

    fn generate(&self, alias: &str, algorithm: KeyAlgorithm) -> Result<PublicKey, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("key store lock poisoned".to_string()))?;

        let key = match algorithm {
            KeyAlgorithm::EcdsaP256Sha256 => PrivateKey::generate(),
        };
        self.write_new(alias, &key)?;

        tracing::debug!(alias = %alias, dir = %self.dir.display(), "Stored new key");
        Ok(key.public_key())
    }

    fn sign(&self, alias: &str, message: &[u8]) -> Result<EcdsaSignature, StoreError> {
        self.read(alias)?
            .map(|key| key.sign(message))
            .ok_or_else(|| StoreError::NotFound(alias.to_string()))
    }

    fn erase(&self, alias: &str) -> Result<(), StoreError> {
        let path = self.key_path(alias)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&path, &e)),
        }
    }
}

/// Aliases become file names: no separators, no dot-files, nothing empty.
fn validate_alias(alias: &str) -> Result<(), StoreError> {
    let valid = !alias.is_empty()
        && !alias.starts_with('.')
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::NotFound(alias.to_string()))
    }
}

fn unavailable(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {err}", path.display()))
}
