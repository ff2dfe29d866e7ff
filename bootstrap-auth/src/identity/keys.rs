//! ECDSA P-256 key types for device identity and enrollment.
//!
//! - Private keys are zeroized on drop
//! - No Debug/Display implementations that leak secrets
//! - Public keys travel as SEC1 uncompressed points
//! - Signatures keep the controller's wire form: big-endian `r` and `s`
//! - Fingerprints use `SHA256:{url_safe_base64_no_padding}` over the SEC1 point

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a P-256 scalar in bytes.
const SCALAR_LEN: usize = 32;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The provided bytes have an invalid length.
    #[error("invalid length: expected at most {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The provided bytes do not represent a valid key or signature.
    #[error("invalid key format")]
    InvalidFormat,

    /// The key could not be serialized.
    #[error("key encoding failed: {0}")]
    Encoding(String),

    /// The fingerprint string has an invalid format.
    #[error("invalid fingerprint format")]
    InvalidFingerprint,
}

/// Signature algorithm bound to a key.
///
/// Both the hardware identity key and the enrollment key use ECDSA over
/// NIST P-256 with SHA-256, which is what the controller verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    EcdsaP256Sha256,
}

impl KeyAlgorithm {
    /// Stable name used in logs and configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EcdsaP256Sha256 => "ecdsa-p256-sha256",
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A zeroize-on-drop wrapper for secret bytes.
///
/// Used for PKCS#8 DER exports to ensure key material doesn't linger in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Get a reference to the secret bytes.
    ///
    /// # Security
    ///
    /// The returned reference should not be stored. Copying the bytes
    /// defeats the purpose of automatic zeroization.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for SecretBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A private ECDSA P-256 signing key.
///
/// # Security
///
/// - Zeroized on drop (the inner `SigningKey` wipes its scalar)
/// - No `Debug` implementation to prevent accidental logging
/// - Only key stores should hold values of this type; everything above the
///   store boundary works with aliases and [`PublicKey`]s
pub struct PrivateKey(p256::ecdsa::SigningKey);

impl PrivateKey {
    /// Generate a new random private key.
    #[must_use]
    pub fn generate() -> Self {
        Self(p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Algorithm this key signs with.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::EcdsaP256Sha256
    }

    /// Sign a message (SHA-256 digest, RFC 6979 deterministic nonce).
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> EcdsaSignature {
        let signature: p256::ecdsa::Signature = self.0.sign(message);
        EcdsaSignature::from_p256(&signature)
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(p256::ecdsa::VerifyingKey::from(&self.0))
    }

    /// Export the private key as PKCS#8 DER bytes.
    ///
    /// The `SecretBytes` wrapper zeroizes the key material when dropped.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Encoding` if the DER encoder fails.
    pub fn to_pkcs8_der(&self) -> Result<SecretBytes, KeyError> {
        use p256::pkcs8::EncodePrivateKey;
        let document = self
            .0
            .to_pkcs8_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(SecretBytes(document.as_bytes().to_vec()))
    }

    /// Load a private key from PKCS#8 DER bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the bytes are not a P-256 PKCS#8 key.
    pub fn from_pkcs8_der(bytes: &[u8]) -> Result<Self, KeyError> {
        use p256::pkcs8::DecodePrivateKey;
        let key =
            p256::ecdsa::SigningKey::from_pkcs8_der(bytes).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }
}

// Explicitly NO Debug implementation for PrivateKey

/// A public ECDSA P-256 verification key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p256::ecdsa::VerifyingKey);

impl PublicKey {
    /// Load a public key from SEC1 bytes (compressed or uncompressed).
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the bytes are not a point on P-256.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }

    /// Export the key as an uncompressed SEC1 point (65 bytes).
    ///
    /// This is the encoding carried inside SubjectPublicKeyInfo.
    #[must_use]
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Algorithm this key verifies.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::EcdsaP256Sha256
    }

    /// Verify a signature over a message.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &EcdsaSignature) -> bool {
        match signature.to_p256() {
            Ok(sig) => self.0.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }

    /// Export as a PEM `PUBLIC KEY` block (SubjectPublicKeyInfo).
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Encoding` if the SPKI encoder fails.
    pub fn to_public_key_pem(&self) -> Result<String, KeyError> {
        use p256::pkcs8::EncodePublicKey;
        self.0
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .map_err(|e| KeyError::Encoding(e.to_string()))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", Fingerprint::from_public_key(self))
    }
}

/// An ECDSA signature split into its `r` and `s` scalars.
///
/// Scalars are stored big-endian without leading zero bytes, which is how the
/// controller encodes them on the wire. Deserialization applies the same
/// checks as [`EcdsaSignature::from_scalars`].
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct EcdsaSignature {
    r: Vec<u8>,
    s: Vec<u8>,
}

impl EcdsaSignature {
    /// Build a signature from big-endian scalars.
    ///
    /// Leading zero bytes are stripped. The scalar values are not range-checked
    /// here; [`PublicKey::verify`] rejects signatures that are not valid P-256
    /// scalars.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if a scalar exceeds 32 significant bytes.
    /// Returns `KeyError::InvalidFormat` if a scalar is zero.
    pub fn from_scalars(r: &[u8], s: &[u8]) -> Result<Self, KeyError> {
        Ok(Self {
            r: Self::normalize(r)?,
            s: Self::normalize(s)?,
        })
    }

    /// Decode an ASN.1 DER `ECDSA-Sig-Value`.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the DER is malformed.
    pub fn from_der(der: &[u8]) -> Result<Self, KeyError> {
        let signature =
            p256::ecdsa::Signature::from_der(der).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self::from_p256(&signature))
    }

    /// The `r` scalar, big-endian.
    #[must_use]
    pub fn r(&self) -> &[u8] {
        &self.r
    }

    /// The `s` scalar, big-endian.
    #[must_use]
    pub fn s(&self) -> &[u8] {
        &self.s
    }

    /// Encode as an ASN.1 DER `ECDSA-Sig-Value` (the X.509 signature form).
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if `r` or `s` is out of range for P-256.
    pub fn to_der(&self) -> Result<Vec<u8>, KeyError> {
        Ok(self.to_p256()?.to_der().as_bytes().to_vec())
    }

    fn from_p256(signature: &p256::ecdsa::Signature) -> Self {
        let (r, s) = signature.split_bytes();
        Self {
            r: strip_leading_zeros(r.as_slice()).to_vec(),
            s: strip_leading_zeros(s.as_slice()).to_vec(),
        }
    }

    fn to_p256(&self) -> Result<p256::ecdsa::Signature, KeyError> {
        p256::ecdsa::Signature::from_scalars(pad_scalar(&self.r)?, pad_scalar(&self.s)?)
            .map_err(|_| KeyError::InvalidFormat)
    }

    fn normalize(scalar: &[u8]) -> Result<Vec<u8>, KeyError> {
        let trimmed = strip_leading_zeros(scalar);
        if trimmed.is_empty() {
            return Err(KeyError::InvalidFormat);
        }
        if trimmed.len() > SCALAR_LEN {
            return Err(KeyError::InvalidLength {
                expected: SCALAR_LEN,
                actual: trimmed.len(),
            });
        }
        Ok(trimmed.to_vec())
    }
}

impl<'de> Deserialize<'de> for EcdsaSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Scalars {
            r: Vec<u8>,
            s: Vec<u8>,
        }

        let scalars = Scalars::deserialize(deserializer)?;
        Self::from_scalars(&scalars.r, &scalars.s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for EcdsaSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Scalars are public, but the full values are noise in logs
        let head = |v: &[u8]| v.iter().take(4).map(|b| format!("{b:02x}")).collect::<String>();
        write!(f, "EcdsaSignature(r={}.., s={}..)", head(&self.r), head(&self.s))
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn pad_scalar(scalar: &[u8]) -> Result<[u8; SCALAR_LEN], KeyError> {
    let offset = SCALAR_LEN
        .checked_sub(scalar.len())
        .ok_or(KeyError::InvalidLength {
            expected: SCALAR_LEN,
            actual: scalar.len(),
        })?;
    let mut padded = [0u8; SCALAR_LEN];
    padded[offset..].copy_from_slice(scalar);
    Ok(padded)
}

/// A SHA-256 fingerprint of a public key.
///
/// Format: `SHA256:{url_safe_base64_no_padding}` over the uncompressed SEC1
/// point. Used to identify keys in logs without printing them.
///
/// # Security
///
/// Comparisons use constant-time equality.
#[derive(Clone, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::derived_hash_with_manual_eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The prefix used for fingerprint strings.
    pub const PREFIX: &'static str = "SHA256:";

    /// Create a fingerprint from a public key.
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let hash = Sha256::digest(public_key.to_sec1_bytes());
        Self(format!("{}{}", Self::PREFIX, URL_SAFE_NO_PAD.encode(hash)))
    }

    /// Parse a fingerprint from a string.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFingerprint` if the string doesn't have the
    /// correct format (`SHA256:{base64}` of 32 bytes).
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let encoded = s
            .strip_prefix(Self::PREFIX)
            .ok_or(KeyError::InvalidFingerprint)?;
        let decoded = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| KeyError::InvalidFingerprint)?;

        if decoded.len() != 32 {
            return Err(KeyError::InvalidFingerprint);
        }

        Ok(Self(s.to_string()))
    }

    /// Get the fingerprint as a string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}
