//! Persistent device identifier.

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bootstrap_core::DeviceId;

const DEVICE_ID_FILENAME: &str = "device_id";

/// Device identifier kept in `<data_dir>/device_id`.
///
/// Generated once as a UUID v4 and reused on every later start, so the
/// controller sees the same gateway across restarts.
#[derive(Debug, Clone)]
pub struct DeviceIdStore {
    path: PathBuf,
}

impl DeviceIdStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(DEVICE_ID_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve the device identifier.
    ///
    /// A configured identifier wins and is not persisted. Otherwise the
    /// stored one is read, or a new one generated and stored.
    pub fn resolve(&self, configured: Option<&str>) -> Result<DeviceId> {
        if let Some(id) = configured {
            let id = id.trim();
            if id.is_empty() {
                bail!("Configured device_id is empty");
            }
            return Ok(DeviceId::new(id));
        }

        if let Some(id) = self.read()? {
            return Ok(id);
        }

        let id = DeviceId::new(uuid::Uuid::new_v4().to_string());
        self.write(&id)?;
        tracing::info!(device_id = %id, path = %self.path.display(), "Generated device identifier");
        Ok(id)
    }

    fn read(&self) -> Result<Option<DeviceId>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read device id from {}", self.path.display())
                })
            }
        };

        let id = content.trim();
        if id.is_empty() {
            bail!("Device id file {} is empty", self.path.display());
        }
        Ok(Some(DeviceId::new(id)))
    }

    fn write(&self, id: &DeviceId) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        std::fs::write(&self.path, format!("{id}\n"))
            .with_context(|| format!("Failed to write device id to {}", self.path.display()))?;

        #[cfg(unix)]
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_once_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceIdStore::new(dir.path());

        let first = store.resolve(None).unwrap();
        assert!(uuid::Uuid::parse_str(first.as_str()).is_ok());

        let second = DeviceIdStore::new(dir.path()).resolve(None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_configured_id_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceIdStore::new(dir.path());
        store.resolve(None).unwrap();

        let id = store.resolve(Some(" gw-1234 ")).unwrap();
        assert_eq!(id.as_str(), "gw-1234");
    }

    #[test]
    fn test_configured_id_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceIdStore::new(dir.path());

        store.resolve(Some("gw-1234")).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_existing_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("device_id"), "gw-from-file\n").unwrap();

        let id = DeviceIdStore::new(dir.path()).resolve(None).unwrap();
        assert_eq!(id.as_str(), "gw-from-file");
    }

    #[test]
    fn test_empty_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceIdStore::new(dir.path());
        assert!(store.resolve(Some("  ")).is_err());

        std::fs::write(store.path(), "\n").unwrap();
        assert!(store.resolve(None).is_err());
    }
}
