#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use keyseal::prelude::*;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Call {
    Generate,
    Store { key_id: String, key: Vec<u8> },
    Fetch { key_id: String },
    Delete { key_id: String },
    Rotate,
    Raw { method: String, path: String, body: Vec<u8> },
    Tick { secs: u32 },
}

fuzz_target!(|calls: Vec<Call>| {
    let clock = Arc::new(FixedClock::new(1_750_000_000));
    let config = ManagerConfig {
        startup: StartupPolicy::Preserve,
        ..ManagerConfig::default()
    };
    let manager = match KeyLifecycleManager::new(SoftDevice::new(), config, clock.clone(), MemoryLog::new()) {
        Ok(manager) => manager,
        Err(_) => return,
    };
    let handler = RequestHandler::new(Arc::new(manager), MemoryLog::new());

    for call in calls.into_iter().take(64) {
        let response = match call {
            Call::Generate => handler.handle(KmsRequest::GenerateKey),
            Call::Store { key_id, key } => {
                let key = PlaintextKey::from(key);
                handler.handle(KmsRequest::StoreKey {
                    key_id,
                    key: keyseal::handlers::EncodedKey::encode(&key),
                })
            }
            Call::Fetch { key_id } => handler.handle(KmsRequest::FetchKey { key_id }),
            Call::Delete { key_id } => handler.handle(KmsRequest::DeleteKey { key_id }),
            Call::Rotate => handler.handle(KmsRequest::RotateKey),
            Call::Raw { method, path, body } => handler.handle_route(&method, &path, &body),
            Call::Tick { secs } => {
                clock.advance(i64::from(secs));
                continue;
            }
        };

        // Every failure maps onto a known status and carries no key
        assert!(matches!(response.status, 200 | 400 | 404 | 405 | 500));
        if !response.is_success() {
            assert!(response.body.get("key").is_none());
        }
    }
});
