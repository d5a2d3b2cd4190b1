//! Secure Memory Handling Utilities
//!
//! Plaintext key material must never outlive the call that needs it. The
//! containers here wipe their contents when dropped so that keys returned by
//! the device, or supplied by callers for sealing, do not linger in freed
//! heap memory.

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A byte container for sensitive data that is zeroed when dropped.
///
/// # Security Properties
///
/// 1. Memory is zeroed on drop and on `clear`
/// 2. `Debug` output never includes the contents
/// 3. Equality is evaluated in constant time
///
/// # Example
///
/// ```
/// use keyseal::secure_memory::SecureBytes;
///
/// let pin = SecureBytes::new(b"1234");
/// assert_eq!(pin.len(), 4);
/// // `pin` is wiped when it goes out of scope
/// ```
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecureBytes {
    bytes: Vec<u8>,
}

impl SecureBytes {
    /// Create a new SecureBytes holding a copy of `data`
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
        }
    }

    /// Create a zero-filled buffer of `len` bytes, ready to be written in place
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    /// Get a reference to the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get a mutable reference to the underlying bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Clear the buffer, zeroing all data first
    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&[u8]> for SecureBytes {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for SecureBytes {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for SecureBytes {}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBytes([REDACTED; {}])", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_bytes_clear() {
        let mut bytes = SecureBytes::new(&[1, 2, 3, 4]);
        assert_eq!(bytes.len(), 4);
        bytes.clear();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_debug_is_redacted() {
        let bytes = SecureBytes::new(b"super secret");
        let rendered = format!("{:?}", bytes);
        assert!(!rendered.contains("super"));
        assert!(rendered.contains("12"));
    }

    #[test]
    fn test_equality() {
        assert_eq!(SecureBytes::new(&[9; 8]), SecureBytes::from(vec![9; 8]));
        assert_ne!(SecureBytes::new(&[9; 8]), SecureBytes::new(&[9; 7]));
    }
}
