/*!
 * PKCS#11 Sealing Device
 *
 * Seals key material with a Hardware Security Module through the PKCS#11
 * interface. The token holds two owner keys, looked up by label:
 *
 * - the owner storage key (AES-256, wrap/unwrap only, never extractable)
 * - the owner signing key (generic secret used for HMAC-SHA256)
 *
 * Sealing imports the plaintext as a transient session object and wraps it
 * with the storage key (`CKM_AES_KEY_WRAP_PAD`); unsealing reverses that.
 * Transient objects are destroyed before the session is released. Replacing
 * the owner keys (`reset`) makes every earlier blob unsealable.
 */

use std::ops::Deref;
use std::path::Path;

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as Pkcs11Error, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use zeroize::Zeroize;

use super::{check_seal_payload, DeviceCapabilities, HardwareCryptoProvider};
use crate::config::DeviceConfig;
use crate::error::{error_codes, KmsError, KmsResult};
use crate::key_management::material::{PlaintextKey, SealedKey, SYMMETRIC_KEY_LEN};
use crate::secure_memory::SecureBytes;

/// Map a PKCS#11 failure into a device operation error
fn device_failure(operation: &'static str, error_code: u32) -> impl FnOnce(Pkcs11Error) -> KmsError {
    move |e| KmsError::device_failed(operation, &e.to_string(), error_code)
}

/// An open session that is released on every exit path.
///
/// Closing the last session of the application also ends the login state,
/// so there is no explicit logout: another thread may still be using the
/// same login.
struct SessionGuard {
    session: Session,
    operation: &'static str,
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        log::debug!("Releasing HSM session after {}", self.operation);
    }
}

/// PKCS#11-backed implementation of `HardwareCryptoProvider`
pub struct Pkcs11Provider {
    context: Pkcs11,
    slot: Slot,
    config: DeviceConfig,
}

impl std::fmt::Debug for Pkcs11Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Provider")
            .field("slot", &self.slot.id())
            .field("config", &self.config)
            .finish()
    }
}

impl Pkcs11Provider {
    /// Load the PKCS#11 library, select a slot and make sure the owner keys
    /// exist on the token.
    ///
    /// # Arguments
    ///
    /// * `config` - Library path, slot/token selection and owner PIN
    ///
    /// # Returns
    ///
    /// A provider ready to open per-call sessions, or `DeviceUnavailable`
    pub fn connect(config: DeviceConfig) -> KmsResult<Self> {
        if !Path::new(&config.library_path).exists() {
            return Err(KmsError::device_unavailable(
                "connect",
                &format!("PKCS#11 library not found: {}", config.library_path),
            ));
        }

        log::info!("Initializing PKCS#11 library: {}", config.library_path);

        let context = Pkcs11::new(&config.library_path).map_err(|e| {
            KmsError::device_unavailable("connect", &format!("Failed to load PKCS#11 library: {}", e))
        })?;

        // OS threads: the library serializes concurrent sessions itself
        context.initialize(CInitializeArgs::OsThreads).map_err(|e| {
            KmsError::device_unavailable(
                "connect",
                &format!("Failed to initialize PKCS#11 library: {}", e),
            )
        })?;

        let slot = Self::select_slot(&context, &config)?;
        log::info!("Using slot: {:?}", slot.id());

        let provider = Self {
            context,
            slot,
            config,
        };
        provider.ensure_owner_keys()?;
        Ok(provider)
    }

    fn select_slot(context: &Pkcs11, config: &DeviceConfig) -> KmsResult<Slot> {
        let slots = context.get_slots_with_token().map_err(|e| {
            KmsError::device_unavailable("connect", &format!("Failed to get slots: {}", e))
        })?;

        if slots.is_empty() {
            return Err(KmsError::device_unavailable("connect", "No slots with tokens found"));
        }

        if let Some(slot_id) = config.slot_id {
            return slots
                .into_iter()
                .find(|s| s.id() == slot_id)
                .ok_or_else(|| {
                    KmsError::device_unavailable("connect", &format!("Slot {} not found", slot_id))
                });
        }

        if let Some(ref token_label) = config.token_label {
            for slot in slots {
                if let Ok(token_info) = context.get_token_info(slot) {
                    if token_info.label().trim() == token_label.trim() {
                        return Ok(slot);
                    }
                }
            }
            return Err(KmsError::device_unavailable(
                "connect",
                &format!("Token with label '{}' not found", token_label),
            ));
        }

        Ok(slots[0])
    }

    /// Open a session, log in as the owner and run `f`.
    ///
    /// The session is closed when `f` returns, whether it succeeded or not.
    fn with_session<T, F>(&self, operation: &'static str, f: F) -> KmsResult<T>
    where
        F: FnOnce(&Session) -> KmsResult<T>,
    {
        let session = self.context.open_rw_session(self.slot).map_err(|e| {
            KmsError::device_unavailable(operation, &format!("Failed to open session: {}", e))
        })?;
        let guard = SessionGuard { session, operation };

        if let Some(pin) = &self.config.user_pin {
            let auth_pin = AuthPin::new(String::from_utf8_lossy(pin.as_bytes()).to_string());
            match guard.login(UserType::User, Some(&auth_pin)) {
                Ok(()) | Err(Pkcs11Error::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {}
                Err(e) => {
                    return Err(KmsError::device_failed(
                        operation,
                        &format!("Failed to login to HSM: {}", e),
                        error_codes::DEVICE_LOGIN_FAILED,
                    ))
                }
            }
        }

        f(&guard.session)
    }

    /// Handle of the owner key labelled `label`, or `None` when the token
    /// holds no such key. Lookup failures and duplicate labels are errors.
    fn lookup_owner_key(
        session: &Session,
        label: &str,
        operation: &'static str,
        error_code: u32,
    ) -> KmsResult<Option<ObjectHandle>> {
        let handles = session
            .find_objects(&[
                Attribute::Class(ObjectClass::SECRET_KEY),
                Attribute::Label(label.as_bytes().to_vec()),
            ])
            .map_err(device_failure(operation, error_code))?;
        single_handle(label, handles, operation, error_code)
    }

    fn find_owner_key(
        session: &Session,
        label: &str,
        operation: &'static str,
        error_code: u32,
    ) -> KmsResult<ObjectHandle> {
        Self::lookup_owner_key(session, label, operation, error_code)?.ok_or_else(|| {
            KmsError::device_failed(
                operation,
                &format!("owner key '{}' is not present on the token", label),
                error_code,
            )
        })
    }

    fn ensure_owner_keys(&self) -> KmsResult<()> {
        self.with_session("provision", |session| {
            let storage = Self::lookup_owner_key(
                session,
                &self.config.storage_key_label,
                "provision",
                error_codes::DEVICE_RESET_FAILED,
            )?;
            let signing = Self::lookup_owner_key(
                session,
                &self.config.signing_key_label,
                "provision",
                error_codes::DEVICE_RESET_FAILED,
            )?;

            if storage.is_none() {
                self.generate_storage_key(session)?;
            }
            if signing.is_none() {
                self.generate_signing_key(session)?;
            }
            Ok(())
        })
    }

    fn generate_storage_key(&self, session: &Session) -> KmsResult<ObjectHandle> {
        let template = vec![
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
            Attribute::Wrap(true),
            Attribute::Unwrap(true),
            Attribute::ValueLen(32.into()),
            Attribute::KeyType(KeyType::AES),
            Attribute::Label(self.config.storage_key_label.clone().into_bytes()),
        ];

        let handle = session
            .generate_key(&Mechanism::AesKeyGen, &template)
            .map_err(device_failure("provision", error_codes::DEVICE_RESET_FAILED))?;
        log::info!("Provisioned owner storage key '{}'", self.config.storage_key_label);
        Ok(handle)
    }

    fn generate_signing_key(&self, session: &Session) -> KmsResult<ObjectHandle> {
        let template = vec![
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
            Attribute::Sign(true),
            Attribute::Verify(true),
            Attribute::ValueLen(32.into()),
            Attribute::KeyType(KeyType::GENERIC_SECRET),
            Attribute::Label(self.config.signing_key_label.clone().into_bytes()),
        ];

        let handle = session
            .generate_key(&Mechanism::GenericSecretKeyGen, &template)
            .map_err(device_failure("provision", error_codes::DEVICE_RESET_FAILED))?;
        log::info!("Provisioned owner signing key '{}'", self.config.signing_key_label);
        Ok(handle)
    }
}

impl HardwareCryptoProvider for Pkcs11Provider {
    fn generate_symmetric_key(&self) -> KmsResult<PlaintextKey> {
        self.with_session("generate_symmetric_key", |session| {
            let mut bytes = SecureBytes::zeroed(SYMMETRIC_KEY_LEN);
            session
                .generate_random_slice(bytes.as_bytes_mut())
                .map_err(device_failure(
                    "generate_symmetric_key",
                    error_codes::DEVICE_RANDOM_FAILED,
                ))?;
            Ok(PlaintextKey::new(bytes))
        })
    }

    fn seal(&self, key: &PlaintextKey) -> KmsResult<SealedKey> {
        check_seal_payload(key)?;
        self.with_session("seal", |session| {
            let storage = Self::find_owner_key(
                session,
                &self.config.storage_key_label,
                "seal",
                error_codes::DEVICE_SEAL_FAILED,
            )?;

            let mut template = vec![
                Attribute::Class(ObjectClass::SECRET_KEY),
                Attribute::KeyType(KeyType::GENERIC_SECRET),
                Attribute::Token(false),
                Attribute::Private(true),
                Attribute::Sensitive(true),
                Attribute::Extractable(true),
                Attribute::Value(key.as_bytes().to_vec()),
            ];
            let created = session.create_object(&template);
            for attribute in template.iter_mut() {
                if let Attribute::Value(value) = attribute {
                    value.zeroize();
                }
            }
            let transient = created.map_err(device_failure("seal", error_codes::DEVICE_SEAL_FAILED))?;

            let wrapped = session.wrap_key(&Mechanism::AesKeyWrapPad, storage, transient);
            let destroyed = session.destroy_object(transient);

            let wrapped = wrapped.map_err(device_failure("seal", error_codes::DEVICE_SEAL_FAILED))?;
            destroyed.map_err(device_failure("seal", error_codes::DEVICE_SEAL_FAILED))?;
            Ok(SealedKey::new(wrapped))
        })
    }

    fn unseal(&self, sealed: &SealedKey) -> KmsResult<PlaintextKey> {
        self.with_session("unseal", |session| {
            let storage = Self::find_owner_key(
                session,
                &self.config.storage_key_label,
                "unseal",
                error_codes::DEVICE_UNSEAL_FAILED,
            )?;

            let template = [
                Attribute::Class(ObjectClass::SECRET_KEY),
                Attribute::KeyType(KeyType::GENERIC_SECRET),
                Attribute::Token(false),
                Attribute::Sensitive(false),
                Attribute::Extractable(true),
            ];
            let transient = session
                .unwrap_key(&Mechanism::AesKeyWrapPad, storage, sealed.as_bytes(), &template)
                .map_err(device_failure("unseal", error_codes::DEVICE_UNSEAL_FAILED))?;

            let attributes = session.get_attributes(transient, &[AttributeType::Value]);
            let destroyed = session.destroy_object(transient);

            let mut attributes =
                attributes.map_err(device_failure("unseal", error_codes::DEVICE_UNSEAL_FAILED))?;
            destroyed.map_err(device_failure("unseal", error_codes::DEVICE_UNSEAL_FAILED))?;

            let mut plaintext = None;
            for attribute in attributes.iter_mut() {
                if let Attribute::Value(value) = attribute {
                    plaintext = Some(PlaintextKey::from(std::mem::take(value)));
                }
            }
            plaintext.ok_or_else(|| {
                KmsError::device_failed(
                    "unseal",
                    "device returned no key value",
                    error_codes::DEVICE_UNSEAL_FAILED,
                )
            })
        })
    }

    fn hash(&self, data: &[u8]) -> KmsResult<Vec<u8>> {
        self.with_session("hash", |session| {
            session
                .digest(&Mechanism::Sha256, data)
                .map_err(device_failure("hash", error_codes::DEVICE_HASH_FAILED))
        })
    }

    fn sign(&self, data: &[u8]) -> KmsResult<Vec<u8>> {
        self.with_session("sign", |session| {
            let signing = Self::find_owner_key(
                session,
                &self.config.signing_key_label,
                "sign",
                error_codes::DEVICE_SIGN_FAILED,
            )?;
            session
                .sign(&Mechanism::Sha256Hmac, signing, data)
                .map_err(device_failure("sign", error_codes::DEVICE_SIGN_FAILED))
        })
    }

    fn reset(&self) -> KmsResult<()> {
        self.with_session("reset", |session| {
            for label in [&self.config.storage_key_label, &self.config.signing_key_label] {
                let handles = session
                    .find_objects(&[Attribute::Label(label.as_bytes().to_vec())])
                    .map_err(device_failure("reset", error_codes::DEVICE_RESET_FAILED))?;
                for handle in handles {
                    session
                        .destroy_object(handle)
                        .map_err(device_failure("reset", error_codes::DEVICE_RESET_FAILED))?;
                }
            }
            self.generate_storage_key(session)?;
            self.generate_signing_key(session)?;
            log::info!("Owner domain reset on slot {:?}", self.slot.id());
            Ok(())
        })
    }

    fn clear_lockout(&self) -> KmsResult<()> {
        // PKCS#11 keeps no dictionary-attack counter; a successful owner
        // login is all that can be checked.
        self.with_session("clear_lockout", |_| Ok(()))
    }

    fn capabilities(&self) -> KmsResult<DeviceCapabilities> {
        let token = self
            .context
            .get_token_info(self.slot)
            .map_err(|e| KmsError::device_unavailable("capabilities", &e.to_string()))?;
        let mechanisms = self
            .context
            .get_mechanism_list(self.slot)
            .map_err(device_failure("capabilities", error_codes::DEVICE_QUERY_FAILED))?;
        let firmware = token.firmware_version();

        Ok(DeviceCapabilities {
            manufacturer: token.manufacturer_id().to_string(),
            model: token.model().to_string(),
            firmware_version: format!("{}.{}", firmware.major(), firmware.minor()),
            mechanisms: mechanisms.iter().map(|m| m.to_string()).collect(),
        })
    }
}

/// The only handle in `handles`, if any. Seal and unseal must agree on one
/// wrapping key, so a label shared by several objects is refused.
fn single_handle<H>(
    label: &str,
    handles: Vec<H>,
    operation: &'static str,
    error_code: u32,
) -> KmsResult<Option<H>> {
    if handles.len() > 1 {
        return Err(KmsError::device_failed(
            operation,
            &format!("{} objects share the owner key label '{}'", handles.len(), label),
            error_code,
        ));
    }
    Ok(handles.into_iter().next())
}
