//! Trust roots for the controller certificate.

use std::path::{Path, PathBuf};

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use x509_parser::pem::Pem;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

#[derive(Debug, thiserror::Error)]
pub enum TrustRootError {
    #[error("failed to read trust roots from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed PEM in {path}: {reason}")]
    Pem { path: PathBuf, reason: String },

    #[error("no certificates found in {0}")]
    Empty(PathBuf),

    #[error("certificate in {path} rejected as trust anchor: {source}")]
    Rejected {
        path: PathBuf,
        source: rustls::Error,
    },
}

/// Load every PEM certificate in `path` as a trust anchor.
///
/// Blocks other than `CERTIFICATE` are skipped. A bundle without a single
/// certificate is an error; connecting with an empty root store would fail
/// every handshake anyway.
pub fn load_trust_roots(path: &Path) -> Result<RootCertStore, TrustRootError> {
    let data = std::fs::read(path).map_err(|source| TrustRootError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut roots = RootCertStore::empty();
    for pem in Pem::iter_from_buffer(&data) {
        let pem = pem.map_err(|e| TrustRootError::Pem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if pem.label != CERTIFICATE_LABEL {
            continue;
        }
        roots
            .add(CertificateDer::from(pem.contents))
            .map_err(|source| TrustRootError::Rejected {
                path: path.to_path_buf(),
                source,
            })?;
    }

    if roots.is_empty() {
        return Err(TrustRootError::Empty(path.to_path_buf()));
    }

    tracing::debug!(path = %path.display(), count = roots.len(), "Loaded trust roots");
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    fn ca_pem(name: &str) -> String {
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_loads_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.pem");
        std::fs::write(&path, ca_pem("root-a") + &ca_pem("root-b")).unwrap();

        let roots = load_trust_roots(&path).unwrap();
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_trust_roots(&dir.path().join("absent.pem")).unwrap_err();
        assert!(matches!(err, TrustRootError::Read { .. }));
    }

    #[test]
    fn test_file_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.pem");
        std::fs::write(&path, "not a certificate\n").unwrap();

        let err = load_trust_roots(&path).unwrap_err();
        assert!(matches!(err, TrustRootError::Empty(_)));
    }

    #[test]
    fn test_private_key_only_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.pem");
        std::fs::write(&path, KeyPair::generate().unwrap().serialize_pem()).unwrap();

        let err = load_trust_roots(&path).unwrap_err();
        assert!(matches!(err, TrustRootError::Empty(_)));
    }

    #[test]
    fn test_client_config_builds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.pem");
        std::fs::write(&path, ca_pem("root")).unwrap();

        let roots = load_trust_roots(&path).unwrap();
        assert!(crate::tls::client_config(roots).is_ok());
    }
}
