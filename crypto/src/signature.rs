//! Recoverable ECDSA signatures over secp256k1.

use crate::error::CryptoError;
use crate::pubkey::PublicKey;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

/// A compact (r || s) signature plus its one-byte recovery id — 65 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; 64],
    recovery_id: u8,
}

impl Signature {
    pub fn from_parts(bytes: [u8; 64], recovery_id: u8) -> Result<Self, CryptoError> {
        if RecoveryId::from_byte(recovery_id).is_none() {
            return Err(CryptoError::InvalidSignature);
        }
        Ok(Self { bytes, recovery_id })
    }

    /// Parse the 65-byte wire form: `r(32) || s(32) || recovery_id(1)`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 65 {
            return Err(CryptoError::InvalidSignature);
        }
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&bytes[..64]);
        Self::from_parts(compact, bytes[64])
    }

    pub fn to_bytes(self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&self.bytes);
        out[64] = self.recovery_id;
        out
    }

    fn to_ecdsa(self) -> Result<EcdsaSignature, CryptoError> {
        EcdsaSignature::from_slice(&self.bytes).map_err(|_| CryptoError::InvalidSignature)
    }

    fn recovery_id(self) -> Result<RecoveryId, CryptoError> {
        RecoveryId::from_byte(self.recovery_id).ok_or(CryptoError::InvalidSignature)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Signature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// A validator's secp256k1 signing identity.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(secret.into()).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    pub fn address(&self) -> String {
        self.public_key().address()
    }

    /// Sign a pre-computed 32-byte digest, returning a recoverable signature.
    pub fn sign(&self, digest: &[u8; 32]) -> Signature {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .expect("signing a 32-byte digest cannot fail");
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&sig.to_bytes());
        Signature {
            bytes,
            recovery_id: recid.to_byte(),
        }
    }
}

/// Recover the public key that produced `signature` over `digest`.
pub fn recover(signature: &Signature, digest: &[u8; 32]) -> Result<PublicKey, CryptoError> {
    let sig = signature.to_ecdsa()?;
    let recid = signature.recovery_id()?;
    let verifying_key = VerifyingKey::recover_from_prehash(digest, &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(PublicKey::from_verifying_key(&verifying_key))
}

/// Verify that `signature` over `digest` was produced by `public_key`.
pub fn verify(signature: &Signature, public_key: &PublicKey, digest: &[u8; 32]) -> bool {
    let Ok(sig) = signature.to_ecdsa() else {
        return false;
    };
    let Ok(verifying_key) = public_key.to_verifying_key() else {
        return false;
    };
    verifying_key.verify_prehash(digest, &sig).is_ok()
}

/// Verify a signature against an address, recovering the signer first. This
/// mirrors the original node's `Signature.Verify(address, hash)` contract,
/// where the caller only holds an address, not the full public key.
pub fn verify_address(signature: &Signature, address: &str, digest: &[u8; 32]) -> bool {
    match recover(signature, digest) {
        Ok(public_key) => public_key.address() == address,
        Err(_) => false,
    }
}
