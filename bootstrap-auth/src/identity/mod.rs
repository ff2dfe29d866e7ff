//! Cryptographic identity types for gateway bootstrap.
//!
//! This module provides ECDSA P-256 keypairs used for both device keys:
//!
//! - [`PrivateKey`] - Signing key with automatic zeroization on drop
//! - [`PublicKey`] - Verification key, exchanged as an uncompressed SEC1 point
//! - [`EcdsaSignature`] - `{r, s}` pair in the controller's wire form
//! - [`Fingerprint`] - `SHA256:{base64_no_padding}` for logging and display
//!
//! # Security Properties
//!
//! - Private keys are zeroized on drop to prevent lingering in memory
//! - No `Debug` implementation for `PrivateKey` prevents accidental logging
//! - Fingerprint comparison uses constant-time equality
//!
//! # Example
//!
//! ```
//! use bootstrap_auth::identity::{Fingerprint, PrivateKey};
//!
//! let private_key = PrivateKey::generate();
//! let public_key = private_key.public_key();
//!
//! let challenge = [0xA1, 0xB2];
//! let signature = private_key.sign(&challenge);
//! assert!(public_key.verify(&challenge, &signature));
//!
//! println!("Key fingerprint: {}", Fingerprint::from_public_key(&public_key));
//! ```

mod keys;

pub use keys::{
    EcdsaSignature, Fingerprint, KeyAlgorithm, KeyError, PrivateKey, PublicKey, SecretBytes,
};
