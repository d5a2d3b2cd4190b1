/*!
 * Hardware Crypto Provider
 *
 * The bridge to the sealing device. Every operation is an independent device
 * session: it is opened, used and released within the call, so providers are
 * safe to share between request threads. Providers never retry; failures are
 * handed straight back to the caller.
 */

pub mod pkcs11;
pub mod soft;

use std::fmt;

use crate::error::{error_codes, KmsError, KmsResult};
use crate::key_management::material::{PlaintextKey, SealedKey, MAX_SEAL_PAYLOAD};

pub use pkcs11::Pkcs11Provider;
pub use soft::SoftDevice;

/// Primitive operations offered by a sealing device.
pub trait HardwareCryptoProvider: Send + Sync {
    /// Draw `SYMMETRIC_KEY_LEN` random bytes from the device.
    fn generate_symmetric_key(&self) -> KmsResult<PlaintextKey>;

    /// Wrap `key` into a blob only this device's owner domain can unwrap.
    fn seal(&self, key: &PlaintextKey) -> KmsResult<SealedKey>;

    /// Recover the plaintext from a blob produced by `seal`.
    fn unseal(&self, sealed: &SealedKey) -> KmsResult<PlaintextKey>;

    /// SHA-256 digest computed by the device.
    fn hash(&self, data: &[u8]) -> KmsResult<Vec<u8>>;

    /// MAC over `data` with the owner signing key.
    fn sign(&self, data: &[u8]) -> KmsResult<Vec<u8>>;

    /// Wipe the owner domain and mint fresh owner keys. Blobs sealed before
    /// the reset can no longer be unsealed.
    fn reset(&self) -> KmsResult<()>;

    /// Clear any authorization lockout state.
    fn clear_lockout(&self) -> KmsResult<()>;

    /// Describe the device for startup logging.
    fn capabilities(&self) -> KmsResult<DeviceCapabilities>;
}

/// Static facts about the device, reported at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub mechanisms: Vec<String>,
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (firmware {}), {} mechanisms",
            self.manufacturer.trim(),
            self.model.trim(),
            self.firmware_version,
            self.mechanisms.len()
        )
    }
}

/// Reject payloads a device cannot seal.
pub(crate) fn check_seal_payload(key: &PlaintextKey) -> KmsResult<()> {
    if key.is_empty() || key.len() > MAX_SEAL_PAYLOAD {
        return Err(KmsError::device_failed(
            "seal",
            &format!(
                "payload must be 1..={} bytes, got {}",
                MAX_SEAL_PAYLOAD,
                key.len()
            ),
            error_codes::DEVICE_SEAL_FAILED,
        ));
    }
    Ok(())
}

impl<D: HardwareCryptoProvider + ?Sized> HardwareCryptoProvider for std::sync::Arc<D> {
    fn generate_symmetric_key(&self) -> KmsResult<PlaintextKey> {
        (**self).generate_symmetric_key()
    }

    fn seal(&self, key: &PlaintextKey) -> KmsResult<SealedKey> {
        (**self).seal(key)
    }

    fn unseal(&self, sealed: &SealedKey) -> KmsResult<PlaintextKey> {
        (**self).unseal(sealed)
    }

    fn hash(&self, data: &[u8]) -> KmsResult<Vec<u8>> {
        (**self).hash(data)
    }

    fn sign(&self, data: &[u8]) -> KmsResult<Vec<u8>> {
        (**self).sign(data)
    }

    fn reset(&self) -> KmsResult<()> {
        (**self).reset()
    }

    fn clear_lockout(&self) -> KmsResult<()> {
        (**self).clear_lockout()
    }

    fn capabilities(&self) -> KmsResult<DeviceCapabilities> {
        (**self).capabilities()
    }
}
