/*!
 * Request Handlers
 *
 * Transport-agnostic request and response types, and the dispatcher that
 * maps them onto a `KeyLifecycleManager`. A listener only has to hand the
 * raw method, path and body to `RequestHandler::handle_route` and write the
 * resulting status and JSON body back.
 *
 * Routes:
 *
 * - `POST /generate-key` returns `{"key_id", "key"}`
 * - `POST /store-key` with body `{"key_id", "key"}`
 * - `GET /fetch-key/{id}` returns `{"key_id", "key"}`
 * - `POST /delete-key/{id}`
 * - `POST /rotate-key` returns the replacement id and the pruned ids
 *
 * Key bytes travel base64-encoded. Failure bodies are
 * `{"error", "message", "code", "type"}`, where `message` is the text meant
 * for end users, and never carry key material.
 */

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use zeroize::Zeroize;

use crate::device::HardwareCryptoProvider;
use crate::error::{error_codes, KmsError, KmsResult, StatusClass};
use crate::key_management::{KeyId, KeyLifecycleManager, PlaintextKey};
use crate::logging::{default_log, EventLog};

const GENERATE_KEY: &str = "/generate-key";
const STORE_KEY: &str = "/store-key";
const FETCH_KEY: &str = "/fetch-key/";
const DELETE_KEY: &str = "/delete-key/";
const ROTATE_KEY: &str = "/rotate-key";

/// Base64 text of a key, wiped when dropped
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedKey(String);

impl EncodedKey {
    pub fn encode(key: &PlaintextKey) -> Self {
        Self(base64::encode(key.as_bytes()))
    }

    pub fn decode(&self) -> KmsResult<PlaintextKey> {
        Ok(PlaintextKey::from(base64::decode(&self.0)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EncodedKey {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl Drop for EncodedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for EncodedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncodedKey([REDACTED])")
    }
}

/// A service request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum KmsRequest {
    GenerateKey,
    StoreKey { key_id: String, key: EncodedKey },
    FetchKey { key_id: String },
    DeleteKey { key_id: String },
    RotateKey,
}

/// Why a raw request could not be turned into a `KmsRequest`
#[derive(Debug)]
pub enum RouteError {
    /// No route has this path
    NotFound,
    /// The path exists but not with this method
    MethodNotAllowed,
    /// The route matched but its body or path parameter is malformed
    Invalid(KmsError),
}

#[derive(Deserialize)]
struct StoreKeyBody {
    key_id: String,
    key: EncodedKey,
}

impl KmsRequest {
    /// Parse a raw method, path and body.
    pub fn from_route(method: &str, path: &str, body: &[u8]) -> Result<Self, RouteError> {
        let path = path.split(|c| c == '?' || c == '#').next().unwrap_or(path);

        if path == GENERATE_KEY || path == STORE_KEY || path == ROTATE_KEY {
            if !method.eq_ignore_ascii_case("POST") {
                return Err(RouteError::MethodNotAllowed);
            }
            return match path {
                GENERATE_KEY => Ok(KmsRequest::GenerateKey),
                ROTATE_KEY => Ok(KmsRequest::RotateKey),
                _ => {
                    let body: StoreKeyBody =
                        serde_json::from_slice(body).map_err(|e| RouteError::Invalid(e.into()))?;
                    Ok(KmsRequest::StoreKey {
                        key_id: body.key_id,
                        key: body.key,
                    })
                }
            };
        }

        if let Some(key_id) = path.strip_prefix(FETCH_KEY) {
            if !method.eq_ignore_ascii_case("GET") {
                return Err(RouteError::MethodNotAllowed);
            }
            return Ok(KmsRequest::FetchKey {
                key_id: key_id.to_string(),
            });
        }

        if let Some(key_id) = path.strip_prefix(DELETE_KEY) {
            if !method.eq_ignore_ascii_case("POST") {
                return Err(RouteError::MethodNotAllowed);
            }
            return Ok(KmsRequest::DeleteKey {
                key_id: key_id.to_string(),
            });
        }

        Err(RouteError::NotFound)
    }

    /// Method, path and body a transport sends for this request.
    ///
    /// Fails with `InvalidInput` when a path id would not survive the trip.
    pub fn to_route(&self) -> KmsResult<(&'static str, String, Vec<u8>)> {
        Ok(match self {
            KmsRequest::GenerateKey => ("POST", GENERATE_KEY.to_string(), Vec::new()),
            KmsRequest::StoreKey { key_id, key } => (
                "POST",
                STORE_KEY.to_string(),
                serde_json::to_vec(&json!({ "key_id": key_id, "key": key }))?,
            ),
            KmsRequest::FetchKey { key_id } => {
                ("GET", format!("{}{}", FETCH_KEY, KeyId::new(key_id.as_str())?), Vec::new())
            }
            KmsRequest::DeleteKey { key_id } => {
                ("POST", format!("{}{}", DELETE_KEY, KeyId::new(key_id.as_str())?), Vec::new())
            }
            KmsRequest::RotateKey => ("POST", ROTATE_KEY.to_string(), Vec::new()),
        })
    }

    /// Route path used in log lines
    pub fn route_name(&self) -> &'static str {
        match self {
            KmsRequest::GenerateKey => GENERATE_KEY,
            KmsRequest::StoreKey { .. } => STORE_KEY,
            KmsRequest::FetchKey { .. } => "/fetch-key",
            KmsRequest::DeleteKey { .. } => "/delete-key",
            KmsRequest::RotateKey => ROTATE_KEY,
        }
    }
}

/// Status code and JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmsResponse {
    pub status: u16,
    pub body: Value,
}

impl KmsResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusClass::Ok.code(),
            body,
        }
    }

    pub fn from_error(err: &KmsError) -> Self {
        Self {
            status: err.status_class().code(),
            body: json!({
                "error": err.to_string(),
                "message": err.user_friendly_message(),
                "code": err.error_code(),
                "type": err.error_type(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusClass::Ok.code()
    }

    /// Serialized body for the wire
    pub fn body_bytes(&self) -> KmsResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.body)?)
    }

    fn route_error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({
                "error": message,
                "message": message,
                "code": error_codes::INVALID_REQUEST,
                "type": "InvalidRequest",
            }),
        }
    }
}

/// Dispatches requests to a shared manager
pub struct RequestHandler<D: HardwareCryptoProvider> {
    manager: Arc<KeyLifecycleManager<D>>,
    log: Arc<dyn EventLog>,
}

impl<D: HardwareCryptoProvider> Clone for RequestHandler<D> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            log: Arc::clone(&self.log),
        }
    }
}

impl<D: HardwareCryptoProvider> RequestHandler<D> {
    pub fn new(manager: Arc<KeyLifecycleManager<D>>, log: Arc<dyn EventLog>) -> Self {
        Self { manager, log }
    }

    /// Handler that logs through the `log` facade
    pub fn with_default_log(manager: Arc<KeyLifecycleManager<D>>) -> Self {
        Self::new(manager, default_log())
    }

    pub fn manager(&self) -> &Arc<KeyLifecycleManager<D>> {
        &self.manager
    }

    /// Parse and dispatch a raw request.
    pub fn handle_route(&self, method: &str, path: &str, body: &[u8]) -> KmsResponse {
        match KmsRequest::from_route(method, path, body) {
            Ok(request) => self.handle(request),
            Err(RouteError::NotFound) => {
                self.log.error(&format!("No route for {} {}", method, path));
                KmsResponse::route_error(404, "no such route")
            }
            Err(RouteError::MethodNotAllowed) => {
                self.log
                    .error(&format!("Method {} not allowed on {}", method, path));
                KmsResponse::route_error(405, "method not allowed")
            }
            Err(RouteError::Invalid(err)) => {
                self.log
                    .error(&format!("Malformed request to {}: {}", path, err));
                KmsResponse::from_error(&err)
            }
        }
    }

    /// Dispatch a parsed request.
    pub fn handle(&self, request: KmsRequest) -> KmsResponse {
        let route = request.route_name();
        self.log.info(&format!("Received request to {}", route));

        match self.dispatch(request) {
            Ok(body) => KmsResponse::ok(body),
            Err(err) => {
                self.log
                    .error(&format!("Request to {} failed: {}", route, err));
                KmsResponse::from_error(&err)
            }
        }
    }

    fn dispatch(&self, request: KmsRequest) -> KmsResult<Value> {
        match request {
            KmsRequest::GenerateKey => {
                let (key_id, key) = self.manager.generate_key()?;
                Ok(json!({ "key_id": key_id, "key": EncodedKey::encode(&key) }))
            }
            KmsRequest::StoreKey { key_id, key } => {
                let key_id = KeyId::new(key_id)?;
                self.manager.store_key(key_id, key.decode()?)?;
                Ok(json!({ "message": "Key stored successfully" }))
            }
            KmsRequest::FetchKey { key_id } => {
                let key_id = path_key_id(key_id)?;
                let key = self.manager.fetch_key(&key_id)?;
                Ok(json!({ "key_id": key_id, "key": EncodedKey::encode(&key) }))
            }
            KmsRequest::DeleteKey { key_id } => {
                let key_id = path_key_id(key_id)?;
                self.manager.delete_key(&key_id)?;
                Ok(json!({ "message": "Key deleted successfully" }))
            }
            KmsRequest::RotateKey => {
                let report = self.manager.rotate_keys()?;
                Ok(json!({
                    "message": "Key rotated successfully",
                    "key_id": report.replacement,
                    "pruned": report.pruned,
                    "skipped": report.skipped,
                }))
            }
        }
    }
}

// An id that fails validation was never stored, so lookups by path report
// it as missing.
fn path_key_id(key_id: String) -> KmsResult<KeyId> {
    match KeyId::new(key_id.as_str()) {
        Ok(key_id) => Ok(key_id),
        Err(KmsError::InvalidInput { .. }) => Err(KmsError::key_not_found(&key_id)),
        Err(err) => Err(err),
    }
}
