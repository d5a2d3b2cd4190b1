#![no_main]

use arbitrary::Arbitrary;
use keyseal::handlers::KmsRequest;
use keyseal::key_management::KeyId;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct RouteInput {
    method: String,
    path: String,
    body: Vec<u8>,
}

fuzz_target!(|input: RouteInput| {
    // Route parsing must never panic
    if let Ok(request) = KmsRequest::from_route(&input.method, &input.path, &input.body) {
        // A parsed request survives its own wire form
        if let Ok((method, path, body)) = request.to_route() {
            let reparsed = KmsRequest::from_route(method, &path, &body);
            assert_eq!(reparsed.ok(), Some(request));
        }
    }

    // Tagged JSON requests
    let _ = serde_json::from_slice::<KmsRequest>(&input.body);

    // Identifier validation
    if let Ok(key_id) = KeyId::new(input.path.clone()) {
        assert!(!key_id.as_str().contains(|c| matches!(c, '/' | '?' | '#' | '%')));
        let _ = key_id.created_at();
    }
});
