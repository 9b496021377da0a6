//! Secret / hash commitment scheme
//!
//! A [`Secret`] is known only to the party able to claim. Its SHA-256
//! digest, [`SecretHash`], is written into the escrow datum at creation and
//! never changes afterwards. Revealing the secret in a claim is the only
//! authorization the claim path checks.

use crate::error::SwapError;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Digest length of [`SecretHash`] in bytes
pub const DIGEST_LENGTH: usize = 32;

/// SHA-256 commitment to a [`Secret`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretHash([u8; DIGEST_LENGTH]);

impl SecretHash {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Parse from a byte slice of exactly [`DIGEST_LENGTH`] bytes
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` on any other length
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SwapError> {
        let arr: [u8; DIGEST_LENGTH] = bytes.try_into().map_err(|_| {
            SwapError::InvalidDatum(format!(
                "secret hash must be {DIGEST_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Digest of arbitrary bytes
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// First 8 bytes as hex, for log lines
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for SecretHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for SecretHash {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| SwapError::InvalidDatum(format!("secret hash is not hex: {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for SecretHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl serde::Serialize for SecretHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> serde::Deserialize<'de> for SecretHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

/// Claim preimage
///
/// Debug output is redacted; use [`Secret::to_hex`] when the value really
/// has to be shown.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap raw bytes
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse from hex
    ///
    /// # Errors
    /// `SwapError::InvalidSecret` if the input is not hex
    pub fn from_hex(text: &str) -> Result<Self, SwapError> {
        hex::decode(text.trim())
            .map(Self)
            .map_err(|_| SwapError::InvalidSecret)
    }

    /// Fresh secret of `length` bytes from the thread-local CSPRNG
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` for a zero length
    pub fn generate(length: usize) -> Result<Self, SwapError> {
        if length == 0 {
            return Err(SwapError::InvalidDatum(
                "secret length must be positive".to_string(),
            ));
        }
        let mut bytes = vec![0u8; length];
        rand::rng().fill_bytes(&mut bytes);
        Ok(Self(bytes))
    }

    /// Raw bytes
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex encoding
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Commitment for this secret
    #[inline]
    #[must_use]
    pub fn commitment(&self) -> SecretHash {
        hash(self)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}

impl serde::Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Deterministic one-way digest of a secret
#[inline]
#[must_use]
pub fn hash(secret: &Secret) -> SecretHash {
    SecretHash::digest(secret.as_bytes())
}

/// `hash(secret) == expected`, compared in constant time
#[must_use]
pub fn verify(secret: &Secret, expected: &SecretHash) -> bool {
    let actual = hash(secret);
    actual.as_bytes()[..].ct_eq(&expected.as_bytes()[..]).into()
}

/// Fresh random secret of `length` bytes
///
/// # Errors
/// See [`Secret::generate`].
#[inline]
pub fn generate(length: usize) -> Result<Secret, SwapError> {
    Secret::generate(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_sha256_vector() {
        let secret = Secret::from_bytes(b"abc".to_vec());
        assert_eq!(
            hash(&secret).to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let secret = Secret::from_bytes(vec![7u8; 32]);
        assert_eq!(hash(&secret), hash(&secret.clone()));
    }

    #[test]
    fn verify_accepts_only_matching_secret() {
        let secret = Secret::from_bytes(b"open sesame".to_vec());
        let commitment = secret.commitment();
        assert!(verify(&secret, &commitment));
        assert!(!verify(&Secret::from_bytes(b"open sesamE".to_vec()), &commitment));
    }

    #[test]
    fn generate_produces_requested_length() {
        let secret = generate(48).unwrap();
        assert_eq!(secret.len(), 48);
        assert_ne!(generate(32).unwrap(), generate(32).unwrap());
    }

    #[test]
    fn generate_rejects_zero_length() {
        assert!(matches!(generate(0), Err(SwapError::InvalidDatum(_))));
    }

    #[test]
    fn from_slice_enforces_digest_length() {
        assert!(SecretHash::from_slice(&[0u8; 32]).is_ok());
        assert!(matches!(
            SecretHash::from_slice(&[0u8; 31]),
            Err(SwapError::InvalidDatum(_))
        ));
        assert!(SecretHash::from_slice(&[0u8; 33]).is_err());
    }

    #[test]
    fn hash_display_and_parse() {
        let commitment = hash(&Secret::from_bytes(b"x".to_vec()));
        let parsed: SecretHash = commitment.to_string().parse().unwrap();
        assert_eq!(parsed, commitment);
        assert!(commitment.to_string().starts_with(&commitment.short()));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::from_bytes(b"hunter2".to_vec());
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains(&secret.to_hex()));
    }

    #[test]
    fn serde_round_trip_as_hex() {
        let secret = Secret::from_bytes(vec![1, 2, 3]);
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"010203\"");
        let commitment = secret.commitment();
        let decoded: SecretHash =
            serde_json::from_str(&serde_json::to_string(&commitment).unwrap()).unwrap();
        assert_eq!(decoded, commitment);
    }
}
