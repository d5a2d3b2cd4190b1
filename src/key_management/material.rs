//! Plaintext and sealed forms of key material.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::secure_memory::SecureBytes;

/// Length of keys minted by the service, in bytes
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Largest payload a device will seal, in bytes
pub const MAX_SEAL_PAYLOAD: usize = 128;

/// Raw key bytes.
///
/// Only ever lives on the stack of a call between generation or unsealing and
/// its consumer. The bytes are zeroed on drop and never printed.
#[derive(PartialEq, Eq)]
pub struct PlaintextKey(SecureBytes);

impl PlaintextKey {
    pub fn new(bytes: SecureBytes) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(SecureBytes::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Explicit copy; the type is deliberately not `Clone`.
    pub fn duplicate(&self) -> Self {
        Self(self.0.clone())
    }
}

impl From<Vec<u8>> for PlaintextKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(SecureBytes::from(bytes))
    }
}

impl fmt::Debug for PlaintextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaintextKey([REDACTED; {}])", self.0.len())
    }
}

/// Device-wrapped key bytes. Useless without the device that sealed them.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedKey(Vec<u8>);

impl SealedKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short hex digest for log lines
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedKey")
            .field("len", &self.0.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
