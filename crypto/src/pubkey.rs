//! Compressed secp256k1 public keys and their derived addresses.

use crate::error::CryptoError;
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A compressed secp256k1 public key (33 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    /// Wrap already-compressed public key bytes.
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    pub(crate) fn from_verifying_key(key: &VerifyingKey) -> Self {
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(key.to_encoded_point(true).as_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub(crate) fn to_verifying_key(self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Derive the checksummed base58 address for this key.
    ///
    /// `address = base58(pubkey || checksum)`, `checksum = sha256(sha256(pubkey))[..4]`
    /// (a direct transliteration of the base58check scheme the original node
    /// used, substituting the workspace's existing `sha2` dependency for
    /// RIPEMD160).
    pub fn address(&self) -> String {
        let checksum = checksum(&self.0);
        let mut payload = Vec::with_capacity(37);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&checksum);
        bs58::encode(payload).into_string()
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 33 {
            return Err(serde::de::Error::custom("public key must be 33 bytes"));
        }
        let mut arr = [0u8; 33];
        arr.copy_from_slice(&bytes);
        PublicKey::from_bytes(arr).map_err(serde::de::Error::custom)
    }
}

fn checksum(data: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}
