//! Integration tests for request handling
//!
//! Routes, status codes and JSON bodies of `RequestHandler`, and the client
//! talking to it through `LocalTransport`.

use std::sync::Arc;

use keyseal::device::soft::SoftOperation;
use keyseal::error::error_codes;
use keyseal::prelude::*;
use serde_json::json;

const NOW: i64 = 1_750_000_000;

fn handler() -> (RequestHandler<Arc<SoftDevice>>, Arc<SoftDevice>, Arc<FixedClock>) {
    let device = Arc::new(SoftDevice::new());
    let clock = Arc::new(FixedClock::new(NOW));
    let manager = KeyLifecycleManager::new(
        device.clone(),
        ManagerConfig::default(),
        clock.clone(),
        MemoryLog::new(),
    )
    .expect("Failed to create manager");
    let handler = RequestHandler::new(Arc::new(manager), MemoryLog::new());
    (handler, device, clock)
}

#[test]
fn test_generate_and_fetch_routes() {
    let (handler, _, _) = handler();

    let generated = handler.handle_route("POST", "/generate-key", b"");
    assert_eq!(generated.status, 200);
    let key_id = generated.body["key_id"].as_str().unwrap().to_string();
    assert_eq!(key_id, NOW.to_string());
    let key = base64::decode(generated.body["key"].as_str().unwrap()).unwrap();
    assert_eq!(key.len(), 32);

    let fetched = handler.handle_route("GET", &format!("/fetch-key/{}", key_id), b"");
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.body["key_id"], key_id.as_str());
    assert_eq!(
        base64::decode(fetched.body["key"].as_str().unwrap()).unwrap(),
        key
    );
}

#[test]
fn test_store_route() {
    let (handler, _, _) = handler();
    let body = json!({ "key_id": "app-1", "key": base64::encode([7u8; 16]) }).to_string();

    let stored = handler.handle_route("POST", "/store-key", body.as_bytes());
    assert_eq!(stored.status, 200);
    assert_eq!(stored.body["message"], "Key stored successfully");
    assert!(handler.manager().contains(&KeyId::new("app-1").unwrap()));
}

#[test]
fn test_store_route_bad_requests() {
    let (handler, _, _) = handler();

    let malformed = handler.handle_route("POST", "/store-key", b"{\"key_id\": ");
    assert_eq!(malformed.status, 400);

    let missing_key = handler.handle_route("POST", "/store-key", br#"{"key_id": "a"}"#);
    assert_eq!(missing_key.status, 400);

    let bad_base64 = handler.handle_route(
        "POST",
        "/store-key",
        br#"{"key_id": "a", "key": "***"}"#,
    );
    assert_eq!(bad_base64.status, 400);
    assert_eq!(bad_base64.body["code"], error_codes::INVALID_KEY_MATERIAL);

    let empty_id = handler.handle_route("POST", "/store-key", br#"{"key_id": "", "key": "AAE="}"#);
    assert_eq!(empty_id.status, 400);
    assert_eq!(empty_id.body["code"], error_codes::INVALID_KEY_ID);

    let oversized = json!({ "key_id": "big", "key": base64::encode([1u8; 129]) }).to_string();
    let response = handler.handle_route("POST", "/store-key", oversized.as_bytes());
    assert_eq!(response.status, 400);

    assert_eq!(handler.manager().key_count(), 0);
}

#[test]
fn test_missing_key_routes() {
    let (handler, _, _) = handler();

    let fetched = handler.handle_route("GET", "/fetch-key/12345", b"");
    assert_eq!(fetched.status, 404);
    assert_eq!(fetched.body["code"], error_codes::KEY_NOT_FOUND);

    let deleted = handler.handle_route("POST", "/delete-key/12345", b"");
    assert_eq!(deleted.status, 404);
}

/// Path ids that could never have been stored are reported as missing
#[test]
fn test_invalid_path_ids_are_not_found() {
    let (handler, _, _) = handler();
    let oversized = "x".repeat(129);

    for path in ["/fetch-key/".to_string(), format!("/fetch-key/{}", oversized)] {
        let response = handler.handle_route("GET", &path, b"");
        assert_eq!(response.status, 404);
        assert_eq!(response.body["code"], error_codes::KEY_NOT_FOUND);
    }
    for path in ["/delete-key/".to_string(), format!("/delete-key/{}", oversized)] {
        assert_eq!(handler.handle_route("POST", &path, b"").status, 404);
    }
}

/// Ids with path delimiters are refused at store time, so a route can never
/// be answered with a different key's bytes
#[test]
fn test_reserved_characters_in_ids() {
    let (handler, _, _) = handler();
    let plain = KeyId::new("a").unwrap();
    handler
        .manager()
        .store_key(plain.clone(), PlaintextKey::from_slice(&[1u8; 16]))
        .unwrap();

    for key_id in ["a?b", "a#b", "a%3Fb"] {
        let body = json!({ "key_id": key_id, "key": base64::encode([2u8; 16]) }).to_string();
        let stored = handler.handle_route("POST", "/store-key", body.as_bytes());
        assert_eq!(stored.status, 400);
        assert_eq!(stored.body["code"], error_codes::INVALID_KEY_ID);

        let request = KmsRequest::FetchKey {
            key_id: key_id.to_string(),
        };
        assert!(matches!(
            request.to_route(),
            Err(KmsError::InvalidInput { .. })
        ));
    }

    // A raw path cut at a delimiter names the key before it
    let fetched = handler.handle_route("GET", "/fetch-key/a?b", b"");
    assert_eq!(fetched.body["key_id"], "a");
    let fetched = handler.handle_route("GET", "/fetch-key/a%3Fb", b"");
    assert_eq!(fetched.status, 404);
    assert_eq!(handler.manager().key_ids(), vec![plain]);

    // Accepted ids survive the trip through a request path unchanged
    for key_id in ["a", "billing-db.v2", "k:1@eu", "1750000000"] {
        let request = KmsRequest::FetchKey {
            key_id: key_id.to_string(),
        };
        let (method, path, body) = request.to_route().unwrap();
        assert_eq!(KmsRequest::from_route(method, &path, &body).unwrap(), request);
    }
}

#[test]
fn test_delete_route() {
    let (handler, _, _) = handler();
    let key_id = handler.manager().create_key().unwrap();

    let deleted = handler.handle_route("POST", &format!("/delete-key/{}", key_id), b"");
    assert_eq!(deleted.status, 200);
    assert_eq!(handler.manager().key_count(), 0);
}

#[test]
fn test_rotate_route() {
    let (handler, _, clock) = handler();
    let old = handler.manager().create_key().unwrap();
    clock.advance(31 * 86_400);

    let rotated = handler.handle_route("POST", "/rotate-key", b"");
    assert_eq!(rotated.status, 200);
    assert_eq!(rotated.body["pruned"], json!([old.to_string()]));
    assert_eq!(rotated.body["key_id"], (NOW + 31 * 86_400).to_string());
}

#[test]
fn test_unknown_routes() {
    let (handler, _, _) = handler();
    assert_eq!(handler.handle_route("GET", "/generate-cert", b"").status, 404);
    assert_eq!(handler.handle_route("GET", "/generate-key", b"").status, 405);
    assert_eq!(handler.handle_route("POST", "/fetch-key/1", b"").status, 405);
}

#[test]
fn test_device_failure_is_internal_error() {
    let (handler, device, _) = handler();
    let key_id = handler.manager().create_key().unwrap();
    device.inject_fault(SoftOperation::Unseal);

    let response = handler.handle_route("GET", &format!("/fetch-key/{}", key_id), b"");
    assert_eq!(response.status, 500);
    assert_eq!(response.body["type"], "DeviceOperationFailed");
    assert!(response.body.get("key").is_none());
}

#[test]
fn test_client_operations() {
    let (handler, _, clock) = handler();
    let client = KmsClient::new(LocalTransport::new(handler.clone()));

    let (generated_id, generated) = client.generate_key().unwrap();
    assert_eq!(client.fetch_key(&generated_id).unwrap(), generated);

    let imported = KeyId::new("imported").unwrap();
    let material = PlaintextKey::from_slice(&[3u8; 48]);
    client.store_key(&imported, &material).unwrap();
    assert_eq!(client.fetch_key(&imported).unwrap(), material);

    client.delete_key(&imported).unwrap();
    assert!(matches!(
        client.fetch_key(&imported),
        Err(KmsError::KeyNotFound { .. })
    ));

    clock.advance(60);
    let replacement = client.rotate_key().unwrap();
    assert_eq!(replacement, KeyId::from_timestamp(NOW + 60));
    assert_eq!(handler.manager().key_count(), 2);
}

#[test]
fn test_client_sees_device_errors() {
    let (handler, device, _) = handler();
    let client = KmsClient::new(LocalTransport::new(handler));
    device.set_available(false);

    let err = client.generate_key().unwrap_err();
    assert!(matches!(err, KmsError::DeviceUnavailable { .. }));
    assert!(err.is_retriable());
}
