/*!
 * keyseal Key Management Service
 *
 * This crate implements the core of a key management service whose key
 * material is protected by a sealing device (a PKCS#11 HSM, or the bundled
 * software emulation). Keys are generated by the device, sealed before they
 * are stored, and unsealed only on request.
 *
 * The main components are:
 *
 * - `device`: the Hardware Crypto Provider trait and its implementations
 * - `key_management`: the key store, rotation and the lifecycle manager
 * - `handlers` and `client`: transport-agnostic request handling
 *
 * # Example
 *
 * ```
 * use keyseal::prelude::*;
 *
 * fn main() -> KmsResult<()> {
 *     let device = SoftDevice::new();
 *     let manager = KeyLifecycleManager::with_defaults(device, ManagerConfig::default())?;
 *
 *     let (key_id, key) = manager.generate_key()?;
 *     assert_eq!(manager.fetch_key(&key_id)?, key);
 *     Ok(())
 * }
 * ```
 */

/// Client for the service operations
pub mod client;

/// Service configuration
pub mod config;

/// Sealing devices
pub mod device;

/// Common error types
pub mod error;

/// Request handlers
pub mod handlers;

/// Key store, rotation and lifecycle management
pub mod key_management;

/// Injected event logging
pub mod logging;

/// Secure memory handling utilities
pub mod secure_memory;

use std::sync::Arc;

pub use config::KmsConfig;
pub use device::{HardwareCryptoProvider, Pkcs11Provider, SoftDevice};
pub use error::{KmsError, KmsResult};
pub use key_management::{KeyId, KeyLifecycleManager, ManagerConfig, PlaintextKey, SealedKey};

/// Open the device selected by `config.backend`.
pub fn connect_device(config: &config::DeviceConfig) -> KmsResult<Arc<dyn HardwareCryptoProvider>> {
    match config.backend {
        config::DeviceBackend::Pkcs11 => {
            log::info!("Connecting to PKCS#11 module {}", config.library_path);
            Ok(Arc::new(Pkcs11Provider::connect(config.clone())?))
        }
        config::DeviceBackend::Soft => {
            log::warn!("Using the software sealing device; keys are sealed under a secret held in process memory");
            Ok(Arc::new(SoftDevice::new()))
        }
    }
}

/// Build a manager from a full configuration.
///
/// Connects the configured device and runs the startup routine on it.
pub fn build_manager(
    config: &KmsConfig,
) -> KmsResult<KeyLifecycleManager<Arc<dyn HardwareCryptoProvider>>> {
    let device = connect_device(&config.device)?;
    KeyLifecycleManager::with_defaults(device, ManagerConfig::from(config))
}

/// Commonly used types.
pub mod prelude {
    pub use crate::build_manager;
    pub use crate::client::{KmsClient, LocalTransport, Transport};
    pub use crate::config::{DeviceBackend, DeviceConfig, KmsConfig, StartupPolicy};
    pub use crate::connect_device;
    pub use crate::device::{DeviceCapabilities, HardwareCryptoProvider, Pkcs11Provider, SoftDevice};
    pub use crate::error::{KmsError, KmsResult, StatusClass};
    pub use crate::handlers::{KmsRequest, KmsResponse, RequestHandler};
    pub use crate::key_management::{
        Clock, FixedClock, KeyId, KeyLifecycleManager, KeyStore, ManagerConfig, PlaintextKey,
        RotationPolicy, RotationReport, SealedKey, SystemClock,
    };
    pub use crate::logging::{EventLog, LogFacade, MemoryLog};
    pub use crate::secure_memory::SecureBytes;
}
