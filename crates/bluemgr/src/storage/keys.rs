//! Pairing key material kept per peer device
//!
//! Long Term Keys (LTK) encrypt the link, Identity Resolving Keys (IRK)
//! resolve private addresses and Connection Signature Resolving Keys (CSRK)
//! sign data. Each key is stored independently on a device record.

use crate::gap::constants::ENC_KEY_SIZE;
use rand::Rng;
use std::fmt;

/// Link encryption key, looked up by its `ediv`/`rand` pair
#[derive(Clone, PartialEq, Eq)]
pub struct LongTermKey {
    pub rand: u64,
    pub ediv: u16,
    pub key: [u8; 16],
    /// Negotiated key size in bytes
    pub key_size: u8,
}

impl LongTermKey {
    pub fn new(rand: u64, ediv: u16, key: [u8; 16], key_size: u8) -> Self {
        Self {
            rand,
            ediv,
            key,
            key_size,
        }
    }

    /// Fresh random key to distribute to the peer
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut key = [0u8; 16];
        rng.fill(&mut key[..]);

        Self {
            rand: rng.gen(),
            ediv: rng.gen(),
            key,
            key_size: ENC_KEY_SIZE,
        }
    }

    /// Whether this key is identified by the given EDIV/RAND pair
    pub fn matches(&self, ediv: u16, rand: u64) -> bool {
        self.ediv == ediv && self.rand == rand
    }
}

impl fmt::Debug for LongTermKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LongTermKey")
            .field("rand", &format_args!("{:#018x}", self.rand))
            .field("ediv", &format_args!("{:#06x}", self.ediv))
            .field("key", &hex::encode(self.key))
            .field("key_size", &self.key_size)
            .finish()
    }
}

/// Resolves the private addresses of one identity
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityResolvingKey {
    pub key: [u8; 16],
}

impl IdentityResolvingKey {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }
}

impl fmt::Debug for IdentityResolvingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityResolvingKey({})", hex::encode(self.key))
    }
}

/// Data signing key and the counter of the last signed write
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureKey {
    pub key: [u8; 16],
    pub sign_cnt: u32,
}

impl SignatureKey {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key, sign_cnt: 0 }
    }

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut key = [0u8; 16];
        rng.fill(&mut key[..]);
        Self::new(key)
    }
}

impl fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureKey")
            .field("key", &hex::encode(self.key))
            .field("sign_cnt", &self.sign_cnt)
            .finish()
    }
}
