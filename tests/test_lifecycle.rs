//! Integration tests for the key lifecycle
//!
//! These tests drive `KeyLifecycleManager` over the software sealing device
//! with a fixed clock, covering round trips, overwrites, rotation retention
//! and the effect of device failures and resets.

use std::sync::Arc;

use keyseal::device::soft::SoftOperation;
use keyseal::logging::Level;
use keyseal::prelude::*;
use proptest::prelude::*;

const DAY: i64 = 86_400;
const NOW: i64 = 1_750_000_000;

type SoftManager = KeyLifecycleManager<Arc<SoftDevice>>;

fn manager_at(now: i64) -> (SoftManager, Arc<SoftDevice>, Arc<FixedClock>, Arc<MemoryLog>) {
    let device = Arc::new(SoftDevice::new());
    let clock = Arc::new(FixedClock::new(now));
    let log = MemoryLog::new();
    let config = ManagerConfig {
        startup: StartupPolicy::Preserve,
        ..ManagerConfig::default()
    };
    let manager = KeyLifecycleManager::new(device.clone(), config, clock.clone(), log.clone())
        .expect("Failed to create manager");
    (manager, device, clock, log)
}

proptest! {
    /// Any payload the device accepts comes back byte-for-byte
    #[test]
    fn proptest_store_fetch_round_trip(payload in prop::collection::vec(any::<u8>(), 1..=128)) {
        let (manager, _, _, _) = manager_at(NOW);
        let key_id = KeyId::new("roundtrip").unwrap();

        manager.store_key(key_id.clone(), PlaintextKey::from(payload.clone())).unwrap();
        let fetched = manager.fetch_key(&key_id).unwrap();
        prop_assert_eq!(fetched.as_bytes(), payload.as_slice());
    }
}

/// Generated keys are 32 bytes and fetch back unchanged
#[test]
fn test_generate_round_trip() {
    let (manager, _, _, _) = manager_at(NOW);
    let (key_id, key) = manager.generate_key().expect("Failed to generate key");

    assert_eq!(key.len(), keyseal::key_management::SYMMETRIC_KEY_LEN);
    assert_eq!(key_id.created_at().unwrap(), NOW);
    assert_eq!(manager.fetch_key(&key_id).unwrap(), key);
}

/// Storing twice under one id keeps a single record with the latest bytes
#[test]
fn test_store_overwrites() {
    let (manager, _, _, _) = manager_at(NOW);
    let key_id = KeyId::new("service-a").unwrap();

    manager
        .store_key(key_id.clone(), PlaintextKey::from_slice(&[1u8; 16]))
        .unwrap();
    manager
        .store_key(key_id.clone(), PlaintextKey::from_slice(&[2u8; 24]))
        .unwrap();

    assert_eq!(manager.key_count(), 1);
    assert_eq!(manager.fetch_key(&key_id).unwrap().as_bytes(), &[2u8; 24][..]);
}

/// Rotation keeps keys up to and including the retention age
#[test]
fn test_rotation_retention_ages() {
    let (manager, _, _, _) = manager_at(NOW);
    for age in [5, 29, 30, 31, 400] {
        manager
            .store_key(
                KeyId::from_timestamp(NOW - age * DAY),
                PlaintextKey::from_slice(&[age as u8; 32]),
            )
            .unwrap();
    }

    let report = manager.rotate_keys().expect("Rotation failed");

    assert_eq!(
        report.pruned,
        vec![
            KeyId::from_timestamp(NOW - 400 * DAY),
            KeyId::from_timestamp(NOW - 31 * DAY),
        ]
    );
    assert_eq!(report.replacement, KeyId::from_timestamp(NOW));
    assert_eq!(manager.key_count(), 4);
    for age in [5, 29, 30] {
        assert!(manager.contains(&KeyId::from_timestamp(NOW - age * DAY)));
    }
    assert!(manager.contains(&report.replacement));
}

/// A custom retention window is honored
#[test]
fn test_rotation_with_short_retention() {
    let device = Arc::new(SoftDevice::new());
    let clock = Arc::new(FixedClock::new(NOW));
    let config = ManagerConfig {
        rotation: RotationPolicy::new(1),
        startup: StartupPolicy::Preserve,
    };
    let manager = KeyLifecycleManager::new(device, config, clock.clone(), MemoryLog::new()).unwrap();

    let old = manager.create_key().unwrap();
    clock.advance(DAY + 1);
    let report = manager.rotate_keys().unwrap();

    assert_eq!(report.pruned, vec![old]);
    assert_eq!(manager.key_count(), 1);
}

/// Missing keys report KeyNotFound and leave the store unchanged
#[test]
fn test_not_found_leaves_store_unchanged() {
    let (manager, _, _, _) = manager_at(NOW);
    manager.create_key().unwrap();
    let missing = KeyId::new("does-not-exist").unwrap();

    assert!(matches!(
        manager.fetch_key(&missing),
        Err(KmsError::KeyNotFound { .. })
    ));
    assert!(matches!(
        manager.delete_key(&missing),
        Err(KmsError::KeyNotFound { .. })
    ));
    assert_eq!(manager.key_count(), 1);
}

/// Delete removes exactly one key
#[test]
fn test_delete_key() {
    let (manager, _, clock, _) = manager_at(NOW);
    let first = manager.create_key().unwrap();
    clock.advance(1);
    let second = manager.create_key().unwrap();

    manager.delete_key(&first).unwrap();
    assert_eq!(manager.key_ids(), vec![second]);
}

/// An unseal failure is reported and the record survives it
#[test]
fn test_unseal_failure_isolation() {
    let (manager, device, _, log) = manager_at(NOW);
    let (key_id, key) = manager.generate_key().unwrap();

    device.inject_fault(SoftOperation::Unseal);
    let err = manager.fetch_key(&key_id).unwrap_err();
    assert!(matches!(err, KmsError::DeviceOperationFailed { .. }));
    assert_eq!(err.status_class(), StatusClass::Internal);
    assert!(manager.contains(&key_id));
    assert!(log.contains(Level::Error, "Unsealing key"));

    device.clear_faults();
    assert_eq!(manager.fetch_key(&key_id).unwrap(), key);
}

/// An unreachable device is a retriable DeviceUnavailable
#[test]
fn test_device_offline() {
    let (manager, device, _, _) = manager_at(NOW);
    device.set_available(false);

    let err = manager.create_key().unwrap_err();
    assert!(matches!(err, KmsError::DeviceUnavailable { .. }));
    assert!(err.is_retriable());
    assert_eq!(manager.key_count(), 0);
}

/// Resetting the device orphans every blob sealed before the reset
#[test]
fn test_reset_hazard() {
    let (manager, device, _, _) = manager_at(NOW);
    let key_id = manager.create_key().unwrap();

    device.reset().unwrap();

    assert!(matches!(
        manager.fetch_key(&key_id),
        Err(KmsError::DeviceOperationFailed { .. })
    ));
    assert!(manager.contains(&key_id));
}

/// A second manager started with the reset policy orphans the first one's keys
#[test]
fn test_startup_reset_orphans_earlier_keys() {
    let (first, device, clock, _) = manager_at(NOW);
    let key_id = first.create_key().unwrap();

    let _second = KeyLifecycleManager::new(
        device.clone(),
        ManagerConfig::default(),
        clock,
        MemoryLog::new(),
    )
    .unwrap();

    assert!(first.fetch_key(&key_id).is_err());
}

/// Pruning stays committed when the replacement cannot be minted
#[test]
fn test_rotation_failure_keeps_prune() {
    let (manager, device, clock, log) = manager_at(NOW);
    manager.create_key().unwrap();
    clock.advance(31 * DAY);

    device.inject_fault(SoftOperation::Generate);
    let err = manager.rotate_keys().unwrap_err();

    assert!(matches!(err, KmsError::DeviceOperationFailed { .. }));
    assert_eq!(manager.key_count(), 0);
    assert!(log.contains(Level::Error, "replacement failed"));
}

/// Keys imported under non-timestamp ids survive rotation
#[test]
fn test_rotation_keeps_imported_ids() {
    let (manager, _, clock, _) = manager_at(NOW);
    let imported = KeyId::new("legacy-import").unwrap();
    manager
        .store_key(imported.clone(), PlaintextKey::from_slice(&[9u8; 32]))
        .unwrap();
    clock.advance(1000 * DAY);

    let report = manager.rotate_keys().unwrap();
    assert_eq!(report.skipped, vec![imported.clone()]);
    assert!(manager.contains(&imported));
}

/// Device hash and sign are reachable through the manager
#[test]
fn test_device_hash_and_sign() {
    let (manager, _, _, _) = manager_at(NOW);
    let digest = manager.device().hash(b"abc").unwrap();
    assert_eq!(
        hex::encode(&digest),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );

    let tag = manager.device().sign(b"message").unwrap();
    assert_eq!(tag.len(), 32);
    assert_eq!(manager.device().sign(b"message").unwrap(), tag);
}
