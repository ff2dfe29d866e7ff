//! Key and request primitives for gateway bootstrap.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Key storage is injected via the [`store::KeyStore`] trait; the
//! [`store::MemoryKeyStore`] implementation is suitable for tests and for
//! gateways without persistent key storage.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bootstrap_auth::csr::{self, CertType, DEFAULT_VALIDITY};
//! use bootstrap_auth::identity::PrivateKey;
//!
//! let key = Arc::new(PrivateKey::generate());
//! let public_key = key.public_key();
//! let request = csr::build("gw-1234", &public_key, CertType::Default, DEFAULT_VALIDITY, key)?;
//! assert_eq!(request.device_id(), "gw-1234");
//! # Ok::<(), bootstrap_auth::csr::CsrError>(())
//! ```

pub mod cert;
pub mod csr;
pub mod identity;
pub mod store;

pub use cert::{
    extract_public_key_from_cert, summarize_certificate, CertError, CertificateSummary,
};
pub use csr::{CertType, CertificateSigningRequest, CsrError, CsrSigner};
pub use identity::{EcdsaSignature, Fingerprint, KeyAlgorithm, KeyError, PrivateKey, PublicKey};
pub use store::{KeyStore, MemoryKeyStore, StoreError};
