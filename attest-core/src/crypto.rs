//! Cryptographic primitives
//!
//! This module provides:
//! - Ed25519 key pairs, public keys and signatures
//! - SHA-256 secure hashes and a length-prefixed hash builder for content hashes
//! - Merkle roots over component hashes (transaction identifiers)

use crate::{Error, Result};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SecureHash([u8; 32]);

impl SecureHash {
    /// All-zero hash
    pub const ZERO: SecureHash = SecureHash([0u8; 32]);

    /// Wrap raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Other(format!("Invalid hash hex: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Other("Hash must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureHash({})", &self.to_hex()[..16])
    }
}

/// Incremental SHA-256 over length-prefixed fields
///
/// Every field is prefixed by its length so that `("ab", "c")` and
/// `("a", "bc")` never collide.
#[derive(Clone)]
pub struct HashBuilder {
    hasher: Sha256,
}

impl HashBuilder {
    /// Start a new hash with a domain tag
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.update(domain.as_bytes());
        builder
    }

    /// Append a field
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Append an optional field; absence is encoded distinctly from any value
    pub fn update_opt(&mut self, bytes: Option<&[u8]>) -> &mut Self {
        match bytes {
            Some(bytes) => {
                self.hasher.update([1u8]);
                self.update(bytes)
            }
            None => {
                self.hasher.update([0u8]);
                self
            }
        }
    }

    /// Finish hashing
    pub fn finish(self) -> SecureHash {
        SecureHash(self.hasher.finalize().into())
    }
}

impl fmt::Debug for HashBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashBuilder").finish_non_exhaustive()
    }
}

/// Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify a signature made with this key
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let verifying_key = match VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key,
            Err(_) => return false,
        };

        let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());
        verifying_key.verify(message, &dalek_sig).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

/// Digital signature (Ed25519)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature bytes (64 bytes)
    #[serde(with = "serde_bytes")]
    bytes: [u8; 64],
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.bytes[..8]))
    }
}

/// Ed25519 key pair for signing
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Public half of the key pair
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.verifying_key.to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature = self.signing_key.sign(message);
        Signature::from_bytes(signature.to_bytes())
    }

    /// Verify a signature made by this key pair
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());
        self.verifying_key
            .verify(message, &dalek_sig)
            .map_err(|e| Error::SignatureError(format!("Verification failed: {}", e)))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Merkle root over component hashes
///
/// An empty list yields [`SecureHash::ZERO`]; odd levels duplicate their last hash.
pub fn merkle_root(leaves: &[SecureHash]) -> SecureHash {
    if leaves.is_empty() {
        return SecureHash::ZERO;
    }

    let mut current_level: Vec<SecureHash> = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity((current_level.len() + 1) / 2);

        for pair in current_level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);

            let mut hasher = Sha256::new();
            hasher.update(left.as_bytes());
            hasher.update(right.as_bytes());
            next_level.push(SecureHash(hasher.finalize().into()));
        }

        current_level = next_level;
    }

    current_level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];
        let keypair1 = KeyPair::from_seed(&seed);
        let keypair2 = KeyPair::from_seed(&seed);

        assert_eq!(keypair1.public_key(), keypair2.public_key());
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"test message";

        let signature = keypair.sign(message);
        assert!(keypair.verify(message, &signature).is_ok());
        assert!(keypair.public_key().verify(message, &signature));

        assert!(keypair.verify(b"wrong message", &signature).is_err());
        assert!(!KeyPair::generate().public_key().verify(message, &signature));
    }

    #[test]
    fn test_hash_builder_is_length_prefixed() {
        let mut a = HashBuilder::new("test");
        a.update(b"ab").update(b"c");
        let mut b = HashBuilder::new("test");
        b.update(b"a").update(b"bc");

        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_hash_builder_optional_fields() {
        let mut none = HashBuilder::new("test");
        none.update_opt(None);
        let mut empty = HashBuilder::new("test");
        empty.update_opt(Some(b""));

        assert_ne!(none.finish(), empty.finish());
    }

    #[test]
    fn test_secure_hash_hex_roundtrip() {
        let hash = SecureHash::sha256(b"attest");
        assert_eq!(SecureHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(SecureHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_merkle_root_empty_and_single() {
        assert_eq!(merkle_root(&[]), SecureHash::ZERO);

        let leaf = SecureHash::sha256(b"one");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_merkle_root_two() {
        let hash1 = SecureHash::sha256(b"1");
        let hash2 = SecureHash::sha256(b"2");

        let mut hasher = Sha256::new();
        hasher.update(hash1.as_bytes());
        hasher.update(hash2.as_bytes());
        let expected = SecureHash::from_bytes(hasher.finalize().into());

        assert_eq!(merkle_root(&[hash1, hash2]), expected);
    }

    #[test]
    fn test_merkle_root_odd_duplicates_last() {
        let a = SecureHash::sha256(b"a");
        let b = SecureHash::sha256(b"b");
        let c = SecureHash::sha256(b"c");

        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
        assert_ne!(merkle_root(&[a, b, c]), merkle_root(&[a, b]));
    }

    #[test]
    fn test_known_signature_vector() {
        // RFC 8032 test vector 1
        let seed = [
            0x9d, 0x61, 0xb1, 0x9d, 0xef, 0xfd, 0x5a, 0x60,
            0xba, 0x84, 0x4a, 0xf4, 0x92, 0xec, 0x2c, 0xc4,
            0x44, 0x49, 0xc5, 0x69, 0x7b, 0x32, 0x69, 0x19,
            0x70, 0x3b, 0xac, 0x03, 0x1c, 0xae, 0x7f, 0x60,
        ];

        let keypair = KeyPair::from_seed(&seed);
        let signature = keypair.sign(b"");
        assert!(keypair.verify(b"", &signature).is_ok());
    }
}
