/*!
 * Software Sealing Device
 *
 * An in-process emulation of a sealing device for hosts without an HSM and
 * for tests. The device owns a root secret and an owner-domain identifier;
 * sealed blobs are AES-256-GCM ciphertexts under a key derived from the root
 * secret and are bound to the owner domain. `reset` replaces both, after
 * which older blobs fail to unseal exactly as they would on a cleared TPM.
 *
 * Availability and per-operation faults can be switched on to exercise the
 * error paths of callers.
 */

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use bincode::Options;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{check_seal_payload, DeviceCapabilities, HardwareCryptoProvider};
use crate::error::{error_codes, KmsError, KmsResult};
use crate::key_management::material::{PlaintextKey, SealedKey, SYMMETRIC_KEY_LEN};
use crate::secure_memory::SecureBytes;

/// Failed unseal attempts tolerated before the device locks out
pub const LOCKOUT_THRESHOLD: u32 = 32;

const BLOB_VERSION: u8 = 1;
const MAX_BLOB_LEN: u64 = 1024;
const SEAL_INFO: &[u8] = b"keyseal/soft/seal";
const SIGN_INFO: &[u8] = b"keyseal/soft/sign";

/// Operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftOperation {
    Generate,
    Seal,
    Unseal,
    Hash,
    Sign,
    Reset,
}

struct OwnerDomain {
    id: Uuid,
    root: SecureBytes,
}

impl OwnerDomain {
    fn fresh() -> Self {
        let mut root = SecureBytes::zeroed(32);
        OsRng.fill_bytes(root.as_bytes_mut());
        Self {
            id: Uuid::new_v4(),
            root,
        }
    }

    fn derive(&self, info: &[u8]) -> KmsResult<SecureBytes> {
        let hk = Hkdf::<Sha256>::new(Some(&self.id.as_bytes()[..]), self.root.as_bytes());
        let mut okm = SecureBytes::zeroed(32);
        hk.expand(info, okm.as_bytes_mut()).map_err(|_| {
            KmsError::device_failed(
                "derive",
                "output length rejected",
                error_codes::DEVICE_SEAL_FAILED,
            )
        })?;
        Ok(okm)
    }
}

#[derive(Serialize, Deserialize)]
struct SoftBlob {
    version: u8,
    owner: [u8; 16],
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

fn blob_codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_BLOB_LEN)
}

/// Software emulation of a sealing device
pub struct SoftDevice {
    owner: RwLock<OwnerDomain>,
    available: AtomicBool,
    failed_unseals: AtomicU32,
    faults: Mutex<HashSet<SoftOperation>>,
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDevice")
            .field("owner", &self.owner_id())
            .field("available", &self.available.load(Ordering::SeqCst))
            .finish()
    }
}

impl SoftDevice {
    /// Create a device with a freshly minted owner domain
    pub fn new() -> Self {
        Self {
            owner: RwLock::new(OwnerDomain::fresh()),
            available: AtomicBool::new(true),
            failed_unseals: AtomicU32::new(0),
            faults: Mutex::new(HashSet::new()),
        }
    }

    /// Identifier of the current owner domain
    pub fn owner_id(&self) -> Uuid {
        self.owner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .id
    }

    /// Make session establishment fail (`false`) or succeed (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every call of `operation` fail until `clear_faults`
    pub fn inject_fault(&self, operation: SoftOperation) {
        self.faults_guard().insert(operation);
    }

    pub fn clear_faults(&self) {
        self.faults_guard().clear();
    }

    /// Failed unseal attempts since the last lockout clear
    pub fn failed_unseals(&self) -> u32 {
        self.failed_unseals.load(Ordering::SeqCst)
    }

    fn faults_guard(&self) -> std::sync::MutexGuard<'_, HashSet<SoftOperation>> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` inside an emulated session on the current owner domain.
    fn with_session<T, F>(&self, name: &str, op: SoftOperation, error_code: u32, f: F) -> KmsResult<T>
    where
        F: FnOnce(&OwnerDomain) -> KmsResult<T>,
    {
        if !self.available.load(Ordering::SeqCst) {
            return Err(KmsError::device_unavailable(name, "software device is offline"));
        }
        if self.faults_guard().contains(&op) {
            return Err(KmsError::device_failed(name, "injected fault", error_code));
        }
        let owner = self
            .owner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&owner)
    }

    fn unseal_failure(&self, cause: &str) -> KmsError {
        self.failed_unseals.fetch_add(1, Ordering::SeqCst);
        KmsError::device_failed("unseal", cause, error_codes::DEVICE_UNSEAL_FAILED)
    }
}

impl HardwareCryptoProvider for SoftDevice {
    fn generate_symmetric_key(&self) -> KmsResult<PlaintextKey> {
        self.with_session(
            "generate_symmetric_key",
            SoftOperation::Generate,
            error_codes::DEVICE_RANDOM_FAILED,
            |_| {
                let mut bytes = SecureBytes::zeroed(SYMMETRIC_KEY_LEN);
                OsRng.try_fill_bytes(bytes.as_bytes_mut()).map_err(|e| {
                    KmsError::device_failed(
                        "generate_symmetric_key",
                        &e.to_string(),
                        error_codes::DEVICE_RANDOM_FAILED,
                    )
                })?;
                Ok(PlaintextKey::new(bytes))
            },
        )
    }

    fn seal(&self, key: &PlaintextKey) -> KmsResult<SealedKey> {
        check_seal_payload(key)?;
        self.with_session("seal", SoftOperation::Seal, error_codes::DEVICE_SEAL_FAILED, |owner| {
            let sealing_key = owner.derive(SEAL_INFO)?;
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(sealing_key.as_bytes()));

            let mut nonce = [0u8; 12];
            OsRng.fill_bytes(&mut nonce);

            let ciphertext = cipher
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: key.as_bytes(),
                        aad: owner.id.as_bytes(),
                    },
                )
                .map_err(|_| {
                    KmsError::device_failed("seal", "encryption failed", error_codes::DEVICE_SEAL_FAILED)
                })?;

            let blob = SoftBlob {
                version: BLOB_VERSION,
                owner: *owner.id.as_bytes(),
                nonce,
                ciphertext,
            };
            let bytes = blob_codec().serialize(&blob).map_err(|e| {
                KmsError::device_failed("seal", &e.to_string(), error_codes::DEVICE_SEAL_FAILED)
            })?;
            Ok(SealedKey::new(bytes))
        })
    }

    fn unseal(&self, sealed: &SealedKey) -> KmsResult<PlaintextKey> {
        self.with_session("unseal", SoftOperation::Unseal, error_codes::DEVICE_UNSEAL_FAILED, |owner| {
            if self.failed_unseals() >= LOCKOUT_THRESHOLD {
                return Err(KmsError::device_failed(
                    "unseal",
                    "device is in lockout",
                    error_codes::DEVICE_UNSEAL_FAILED,
                ));
            }

            let blob: SoftBlob = blob_codec()
                .deserialize(sealed.as_bytes())
                .map_err(|e| self.unseal_failure(&format!("malformed blob: {}", e)))?;
            if blob.version != BLOB_VERSION {
                return Err(self.unseal_failure(&format!("unknown blob version {}", blob.version)));
            }
            if &blob.owner != owner.id.as_bytes() {
                return Err(self.unseal_failure("blob was sealed under a different owner domain"));
            }

            let sealing_key = owner.derive(SEAL_INFO)?;
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(sealing_key.as_bytes()));
            let plaintext = cipher
                .decrypt(
                    Nonce::from_slice(&blob.nonce),
                    Payload {
                        msg: &blob.ciphertext,
                        aad: owner.id.as_bytes(),
                    },
                )
                .map_err(|_| self.unseal_failure("integrity check failed"))?;
            Ok(PlaintextKey::from(plaintext))
        })
    }

    fn hash(&self, data: &[u8]) -> KmsResult<Vec<u8>> {
        self.with_session("hash", SoftOperation::Hash, error_codes::DEVICE_HASH_FAILED, |_| {
            Ok(Sha256::digest(data).to_vec())
        })
    }

    fn sign(&self, data: &[u8]) -> KmsResult<Vec<u8>> {
        self.with_session("sign", SoftOperation::Sign, error_codes::DEVICE_SIGN_FAILED, |owner| {
            let signing_key = owner.derive(SIGN_INFO)?;
            let key = hmac::Key::new(hmac::HMAC_SHA256, signing_key.as_bytes());
            Ok(hmac::sign(&key, data).as_ref().to_vec())
        })
    }

    fn reset(&self) -> KmsResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(KmsError::device_unavailable("reset", "software device is offline"));
        }
        if self.faults_guard().contains(&SoftOperation::Reset) {
            return Err(KmsError::device_failed(
                "reset",
                "injected fault",
                error_codes::DEVICE_RESET_FAILED,
            ));
        }
        let mut owner = self
            .owner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *owner = OwnerDomain::fresh();
        Ok(())
    }

    fn clear_lockout(&self) -> KmsResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(KmsError::device_unavailable(
                "clear_lockout",
                "software device is offline",
            ));
        }
        self.failed_unseals.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn capabilities(&self) -> KmsResult<DeviceCapabilities> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(KmsError::device_unavailable(
                "capabilities",
                "software device is offline",
            ));
        }
        Ok(DeviceCapabilities {
            manufacturer: "keyseal".to_string(),
            model: "soft-device".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            mechanisms: vec![
                "AES-256-GCM seal".to_string(),
                "HMAC-SHA256".to_string(),
                "SHA-256".to_string(),
            ],
        })
    }
}
