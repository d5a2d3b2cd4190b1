/*!
 * Key Management
 *
 * This module holds the lifecycle of symmetric keys: identifiers, the
 * in-memory store of sealed keys, the rotation policy and the manager that
 * ties them to a sealing device.
 */

pub mod clock;
pub mod key_id;
pub mod manager;
pub mod material;
pub mod rotation;
pub mod store;

pub use clock::Clock;
pub use clock::FixedClock;
pub use clock::SystemClock;
pub use key_id::KeyId;
pub use manager::KeyLifecycleManager;
pub use manager::ManagerConfig;
pub use material::PlaintextKey;
pub use material::SealedKey;
pub use material::MAX_SEAL_PAYLOAD;
pub use material::SYMMETRIC_KEY_LEN;
pub use rotation::RotationPolicy;
pub use rotation::RotationReport;
pub use store::KeyStore;
pub use store::PruneOutcome;
