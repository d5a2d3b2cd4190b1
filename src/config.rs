/*!
 * Service Configuration
 *
 * Configuration is a JSON document. Every field has a default, so an empty
 * object is a valid configuration. The default device is the PKCS#11 module;
 * the software device must be asked for by name.
 */

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{KmsError, KmsResult};
use crate::secure_memory::SecureBytes;

/// Environment variable that overrides the configured HSM PIN
pub const PIN_ENV_VAR: &str = "KEYSEAL_HSM_PIN";

/// Default retention window for rotation, in days
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KmsConfig {
    pub device: DeviceConfig,
    pub rotation: RotationConfig,
    pub startup: StartupPolicy,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            rotation: RotationConfig::default(),
            startup: StartupPolicy::default(),
        }
    }
}

/// Which device implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceBackend {
    /// A PKCS#11 module (hardware HSM or SoftHSM)
    #[default]
    Pkcs11,
    /// The in-process software emulation; its root secret lives in process
    /// memory, so it is for tests and development only
    Soft,
}

/// Device configuration parameters
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: DeviceBackend,

    /// Path to the PKCS#11 library
    pub library_path: String,

    /// Slot ID to use
    pub slot_id: Option<u64>,

    /// Token label to use when no slot ID is given
    pub token_label: Option<String>,

    /// Owner PIN used to authorize seal and unseal
    #[serde(skip_serializing, deserialize_with = "deserialize_pin")]
    pub user_pin: Option<SecureBytes>,

    /// Label of the token-resident owner storage (wrapping) key
    pub storage_key_label: String,

    /// Label of the token-resident owner signing key
    pub signing_key_label: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Pkcs11,
            library_path: "/usr/lib/softhsm/libsofthsm2.so".to_string(),
            slot_id: None,
            token_label: None,
            user_pin: None,
            storage_key_label: "keyseal-owner-storage".to_string(),
            signing_key_label: "keyseal-owner-signing".to_string(),
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("backend", &self.backend)
            .field("library_path", &self.library_path)
            .field("slot_id", &self.slot_id)
            .field("token_label", &self.token_label)
            .field("user_pin", &"[REDACTED]")
            .field("storage_key_label", &self.storage_key_label)
            .field("signing_key_label", &self.signing_key_label)
            .finish()
    }
}

fn deserialize_pin<'de, D>(deserializer: D) -> Result<Option<SecureBytes>, D::Error>
where
    D: Deserializer<'de>,
{
    let pin: Option<String> = Option::deserialize(deserializer)?;
    Ok(pin.map(|p| SecureBytes::from(p.into_bytes())))
}

/// Rotation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Keys older than this many days are removed by rotation
    pub retention_days: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// What the lifecycle manager does to the device when it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Clear lockout, wipe the owner domain and log capabilities.
    /// Keys sealed by an earlier run become unsealable.
    #[default]
    ResetDevice,
    /// Leave the device untouched; only log capabilities.
    Preserve,
}

impl KmsConfig {
    /// Parse a configuration from a JSON string
    pub fn from_json(json: &str) -> KmsResult<Self> {
        let mut config: KmsConfig = serde_json::from_str(json)
            .map_err(|e| KmsError::Configuration(format!("invalid configuration: {}", e)))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> KmsResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KmsError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        log::info!("Loaded configuration from {}", path.display());
        Self::from_json(&contents)
    }

    /// `<config dir>/keyseal/config.json`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("keyseal").join("config.json"))
    }

    /// Take the PIN from the environment when set
    pub fn apply_env(&mut self) {
        if let Ok(pin) = std::env::var(PIN_ENV_VAR) {
            if !pin.is_empty() {
                self.device.user_pin = Some(SecureBytes::from(pin.into_bytes()));
            }
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> KmsResult<()> {
        if self.rotation.retention_days == 0 {
            return Err(KmsError::Configuration(
                "rotation.retention_days must be at least 1".to_string(),
            ));
        }
        if self.device.backend == DeviceBackend::Pkcs11 {
            if self.device.library_path.trim().is_empty() {
                return Err(KmsError::Configuration(
                    "device.library_path is required for the pkcs11 backend".to_string(),
                ));
            }
            if self.device.storage_key_label == self.device.signing_key_label {
                return Err(KmsError::Configuration(
                    "storage and signing key labels must differ".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Retention window in seconds
    pub fn retention_secs(&self) -> i64 {
        i64::from(self.rotation.retention_days) * 24 * 3600
    }
}
