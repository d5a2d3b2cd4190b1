#![no_main]

use keyseal::device::{HardwareCryptoProvider, SoftDevice};
use keyseal::key_management::{PlaintextKey, SealedKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let device = SoftDevice::new();

    // Arbitrary blobs must be rejected, never unsealed
    assert!(device.unseal(&SealedKey::new(data.to_vec())).is_err());

    // Any sealable payload round-trips, and a flipped byte is detected
    if !data.is_empty() && data.len() <= 128 {
        let sealed = device.seal(&PlaintextKey::from_slice(data)).unwrap();
        let unsealed = device.unseal(&sealed).unwrap();
        assert_eq!(unsealed.as_bytes(), data);

        let mut tampered = sealed.as_bytes().to_vec();
        let index = data[0] as usize % tampered.len();
        tampered[index] ^= 0x01;
        assert!(device.unseal(&SealedKey::new(tampered)).is_err());
    }
});
