/*!
 * KMS Client
 *
 * Issues the five service operations through a `Transport` and turns error
 * responses back into `KmsError` values.
 */

use serde::Deserialize;
use serde_json::Value;

use crate::device::HardwareCryptoProvider;
use crate::error::{error_codes, KmsError, KmsResult};
use crate::handlers::{EncodedKey, KmsRequest, KmsResponse, RequestHandler};
use crate::key_management::{KeyId, PlaintextKey};

/// Carries a request to a service and brings back its response.
pub trait Transport {
    fn send(&self, request: KmsRequest) -> KmsResult<KmsResponse>;
}

/// Transport that calls a `RequestHandler` in the same process
pub struct LocalTransport<D: HardwareCryptoProvider> {
    handler: RequestHandler<D>,
}

impl<D: HardwareCryptoProvider> LocalTransport<D> {
    pub fn new(handler: RequestHandler<D>) -> Self {
        Self { handler }
    }
}

impl<D: HardwareCryptoProvider> Transport for LocalTransport<D> {
    fn send(&self, request: KmsRequest) -> KmsResult<KmsResponse> {
        Ok(self.handler.handle(request))
    }
}

#[derive(Deserialize)]
struct KeyBody {
    key_id: KeyId,
    key: EncodedKey,
}

#[derive(Deserialize)]
struct RotateBody {
    key_id: KeyId,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: u32,
    #[serde(rename = "type")]
    kind: String,
}

/// Client for the key management service
pub struct KmsClient<T: Transport> {
    transport: T,
}

impl<T: Transport> KmsClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Generate a key; returns its identifier and plaintext
    pub fn generate_key(&self) -> KmsResult<(KeyId, PlaintextKey)> {
        let body = self.call(KmsRequest::GenerateKey, None)?;
        let body: KeyBody = serde_json::from_value(body)?;
        Ok((body.key_id, body.key.decode()?))
    }

    pub fn store_key(&self, key_id: &KeyId, key: &PlaintextKey) -> KmsResult<()> {
        let request = KmsRequest::StoreKey {
            key_id: key_id.to_string(),
            key: EncodedKey::encode(key),
        };
        self.call(request, Some(key_id))?;
        Ok(())
    }

    pub fn fetch_key(&self, key_id: &KeyId) -> KmsResult<PlaintextKey> {
        let request = KmsRequest::FetchKey {
            key_id: key_id.to_string(),
        };
        let body: KeyBody = serde_json::from_value(self.call(request, Some(key_id))?)?;
        body.key.decode()
    }

    pub fn delete_key(&self, key_id: &KeyId) -> KmsResult<()> {
        let request = KmsRequest::DeleteKey {
            key_id: key_id.to_string(),
        };
        self.call(request, Some(key_id))?;
        Ok(())
    }

    /// Rotate keys; returns the identifier of the replacement key
    pub fn rotate_key(&self) -> KmsResult<KeyId> {
        let body: RotateBody = serde_json::from_value(self.call(KmsRequest::RotateKey, None)?)?;
        Ok(body.key_id)
    }

    fn call(&self, request: KmsRequest, key_id: Option<&KeyId>) -> KmsResult<Value> {
        let response = self.transport.send(request)?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(error_from_response(&response, key_id))
        }
    }
}

/// Rebuild the error a service reported.
fn error_from_response(response: &KmsResponse, key_id: Option<&KeyId>) -> KmsError {
    let body: ErrorBody = match serde_json::from_value(response.body.clone()) {
        Ok(body) => body,
        Err(_) => {
            return KmsError::Serialization(format!(
                "unexpected response {}: {}",
                response.status, response.body
            ))
        }
    };

    match body.kind.as_str() {
        "KeyNotFound" => KmsError::KeyNotFound {
            key_id: key_id.map(|id| id.to_string()).unwrap_or_default(),
            error_code: body.code,
        },
        "DeviceUnavailable" => KmsError::DeviceUnavailable {
            operation: "remote".to_string(),
            cause: body.error,
            error_code: body.code,
        },
        "DeviceOperationFailed" => KmsError::DeviceOperationFailed {
            operation: "remote".to_string(),
            cause: body.error,
            error_code: body.code,
        },
        "Configuration" => KmsError::Configuration(body.error),
        "Serialization" => KmsError::Serialization(body.error),
        "Io" => KmsError::Io(body.error),
        _ => KmsError::InvalidInput {
            parameter: "request".to_string(),
            expected: "a request the service accepts".to_string(),
            actual: body.error,
            error_code: if body.code == 0 {
                error_codes::INVALID_REQUEST
            } else {
                body.code
            },
        },
    }
}
