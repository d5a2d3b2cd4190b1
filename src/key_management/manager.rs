/*!
 * Key Lifecycle Manager
 *
 * Composes a sealing device, the key store, a clock and an event log into
 * the five service operations: generate, store, fetch, delete and rotate.
 *
 * Plaintext keys exist only between a device call and the caller that asked
 * for them. The store only ever sees sealed bytes, and its lock is never
 * held while the device is working.
 */

use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::key_id::KeyId;
use super::material::{PlaintextKey, SealedKey, MAX_SEAL_PAYLOAD};
use super::rotation::{RotationPolicy, RotationReport};
use super::store::KeyStore;
use crate::config::{KmsConfig, StartupPolicy};
use crate::device::HardwareCryptoProvider;
use crate::error::{error_codes, KmsError, KmsResult};
use crate::logging::{default_log, EventLog};

/// Manager settings derived from `KmsConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerConfig {
    pub rotation: RotationPolicy,
    pub startup: StartupPolicy,
}

impl From<&KmsConfig> for ManagerConfig {
    fn from(config: &KmsConfig) -> Self {
        Self {
            rotation: RotationPolicy::from(config),
            startup: config.startup,
        }
    }
}

/// Owns the key store and mediates every access to it.
///
/// Shared between request threads as `Arc<KeyLifecycleManager<D>>`.
pub struct KeyLifecycleManager<D: HardwareCryptoProvider> {
    device: D,
    store: KeyStore,
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    log: Arc<dyn EventLog>,
}

impl<D: HardwareCryptoProvider> KeyLifecycleManager<D> {
    /// Create a manager and run the startup routine on `device`.
    ///
    /// With `StartupPolicy::ResetDevice` the device lockout is cleared and
    /// its owner domain wiped, so blobs sealed by any earlier process can no
    /// longer be unsealed. `StartupPolicy::Preserve` only queries and logs
    /// the device capabilities.
    pub fn new(
        device: D,
        config: ManagerConfig,
        clock: Arc<dyn Clock>,
        log: Arc<dyn EventLog>,
    ) -> KmsResult<Self> {
        let manager = Self {
            device,
            store: KeyStore::new(),
            config,
            clock,
            log,
        };
        manager.startup()?;
        Ok(manager)
    }

    /// Manager on the wall clock that logs through the `log` facade
    pub fn with_defaults(device: D, config: ManagerConfig) -> KmsResult<Self> {
        Self::new(device, config, Arc::new(SystemClock), default_log())
    }

    fn startup(&self) -> KmsResult<()> {
        if self.config.startup == StartupPolicy::ResetDevice {
            self.device
                .clear_lockout()
                .map_err(|e| self.report("Device initialization failed", e))?;
            self.log.info("Device lockout cleared");

            self.device
                .reset()
                .map_err(|e| self.report("Device initialization failed", e))?;
            self.log
                .info("Device owner domain reset; previously sealed keys are unrecoverable");
        }

        let capabilities = self
            .device
            .capabilities()
            .map_err(|e| self.report("Device capability query failed", e))?;
        self.log
            .info(&format!("Device initialized: {}", capabilities));
        Ok(())
    }

    /// Generate a key and keep only its sealed form.
    pub fn create_key(&self) -> KmsResult<KeyId> {
        let (key_id, _plaintext) = self.generate_key()?;
        Ok(key_id)
    }

    /// Generate a key, store it sealed and hand the plaintext to the caller.
    ///
    /// Nothing is stored when generation or sealing fails. Two keys created
    /// within the same second share an identifier; the later one wins.
    pub fn generate_key(&self) -> KmsResult<(KeyId, PlaintextKey)> {
        let (plaintext, sealed) = self
            .mint()
            .map_err(|e| self.report("Key generation failed", e))?;

        let key_id = KeyId::from_timestamp(self.clock.now());
        self.insert(&key_id, sealed, "Generated");
        Ok((key_id, plaintext))
    }

    /// Seal caller-supplied key material under `key_id`, replacing any
    /// existing record with that identifier.
    pub fn store_key(&self, key_id: KeyId, key: PlaintextKey) -> KmsResult<()> {
        if key.is_empty() || key.len() > MAX_SEAL_PAYLOAD {
            let err = KmsError::invalid_input(
                "key",
                &format!("1..={} bytes", MAX_SEAL_PAYLOAD),
                &format!("{} bytes", key.len()),
                error_codes::INVALID_KEY_MATERIAL,
            );
            return Err(self.report("Key store rejected", err));
        }

        let sealed = self
            .device
            .seal(&key)
            .map_err(|e| self.report(&format!("Sealing key {} failed", key_id), e))?;
        self.insert(&key_id, sealed, "Stored");
        Ok(())
    }

    /// Unseal the key stored under `key_id`.
    ///
    /// A record that fails to unseal stays in the store untouched.
    pub fn fetch_key(&self, key_id: &KeyId) -> KmsResult<PlaintextKey> {
        let sealed = self.store.lookup(key_id)?;
        let plaintext = self.device.unseal(&sealed).map_err(|e| {
            self.report(
                &format!("Unsealing key {} ({}) failed", key_id, sealed.fingerprint()),
                e,
            )
        })?;
        self.log.info(&format!("Fetched key {}", key_id));
        Ok(plaintext)
    }

    pub fn delete_key(&self, key_id: &KeyId) -> KmsResult<()> {
        self.store.delete(key_id)?;
        self.log.info(&format!("Deleted key {}", key_id));
        Ok(())
    }

    /// Remove keys past retention, then add one fresh key.
    ///
    /// Pruning commits before the replacement is minted. If minting fails
    /// the error is returned and the pruned keys stay gone.
    pub fn rotate_keys(&self) -> KmsResult<RotationReport> {
        let now = self.clock.now();
        let outcome = self
            .store
            .prune_older_than(&self.config.rotation, now);

        for key_id in &outcome.unparseable {
            self.log.error(&format!(
                "Key {} has no creation time and was kept by rotation",
                key_id
            ));
        }
        self.log.info(&format!(
            "Rotation removed {} expired key(s)",
            outcome.removed.len()
        ));

        let (_plaintext, sealed) = self.mint().map_err(|e| {
            self.report(
                &format!(
                    "Rotation removed {} key(s) but minting the replacement failed",
                    outcome.removed.len()
                ),
                e,
            )
        })?;

        let replacement = KeyId::from_timestamp(self.clock.now());
        self.insert(&replacement, sealed, "Rotated in");
        Ok(RotationReport {
            pruned: outcome.removed,
            skipped: outcome.unparseable,
            replacement,
        })
    }

    pub fn key_count(&self) -> usize {
        self.store.len()
    }

    pub fn key_ids(&self) -> Vec<KeyId> {
        self.store.key_ids()
    }

    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.store.contains(key_id)
    }

    /// The underlying device, for hashing and signing
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn mint(&self) -> KmsResult<(PlaintextKey, SealedKey)> {
        let plaintext = self.device.generate_symmetric_key()?;
        let sealed = self.device.seal(&plaintext)?;
        Ok((plaintext, sealed))
    }

    fn insert(&self, key_id: &KeyId, sealed: SealedKey, verb: &str) {
        let fingerprint = sealed.fingerprint();
        if self.store.insert(key_id.clone(), sealed).is_some() {
            self.log
                .info(&format!("Key {} replaced an existing record", key_id));
        }
        self.log
            .info(&format!("{} key {} ({})", verb, key_id, fingerprint));
    }

    fn report(&self, context: &str, err: KmsError) -> KmsError {
        self.log.error(&format!("{}: {}", context, err));
        err
    }
}
