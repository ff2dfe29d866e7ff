//! Certificate signing requests for enrollment keys.
//!
//! The builder binds a device identifier to an enrollment public key:
//! 1. Caller supplies the device ID, the public key and a [`CsrSigner`]
//! 2. A PKCS#10 request with `CN=<device ID>` is encoded with rcgen
//! 3. The request is signed through the signer, so private key material
//!    stays behind the key store boundary
//! 4. The encoded request is parsed back and its signature checked against
//!    the supplied public key before it is returned

mod error;
mod request;

pub use error::CsrError;
pub use request::{build, CertType, CertificateSigningRequest, CsrSigner, DEFAULT_VALIDITY};
