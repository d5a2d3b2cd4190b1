/*!
 * Error Handling for the keyseal Key Management Service
 *
 * Every failure surfaced by the device layer, the key store or the lifecycle
 * manager is a `KmsError`. Variants carry the failing operation, a cause and a
 * numeric error code; transports map them onto response classes through
 * `KmsError::status_class`.
 */

use std::collections::HashMap;
use thiserror::Error;

/// Error type for all key management operations
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("Device unavailable: {operation} - {cause}")]
    DeviceUnavailable {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Device operation failed: {operation} - {cause}")]
    DeviceOperationFailed {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Key not found: {key_id}")]
    KeyNotFound { key_id: String, error_code: u32 },

    #[error("Invalid input: {parameter} - expected {expected}, got {actual}")]
    InvalidInput {
        parameter: String,
        expected: String,
        actual: String,
        error_code: u32,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Coarse response classes used by transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Ok,
    BadRequest,
    NotFound,
    Internal,
}

impl StatusClass {
    /// HTTP-style status code for this class
    pub fn code(self) -> u16 {
        match self {
            StatusClass::Ok => 200,
            StatusClass::BadRequest => 400,
            StatusClass::NotFound => 404,
            StatusClass::Internal => 500,
        }
    }
}

/// Error code constants for different error categories
pub mod error_codes {
    // Device errors: 1000-1999
    pub const DEVICE_SESSION_FAILED: u32 = 1001;
    pub const DEVICE_LOGIN_FAILED: u32 = 1003;
    pub const DEVICE_RANDOM_FAILED: u32 = 1010;
    pub const DEVICE_SEAL_FAILED: u32 = 1011;
    pub const DEVICE_UNSEAL_FAILED: u32 = 1012;
    pub const DEVICE_HASH_FAILED: u32 = 1013;
    pub const DEVICE_SIGN_FAILED: u32 = 1014;
    pub const DEVICE_RESET_FAILED: u32 = 1015;
    pub const DEVICE_QUERY_FAILED: u32 = 1016;

    // Key store errors: 2000-2999
    pub const KEY_NOT_FOUND: u32 = 2001;

    // Input errors: 3000-3999
    pub const INVALID_KEY_ID: u32 = 3001;
    pub const INVALID_KEY_MATERIAL: u32 = 3002;
    pub const INVALID_REQUEST: u32 = 3003;

    // Ambient errors: 9000-9999
    pub const CONFIGURATION_ERROR: u32 = 9001;
    pub const SERIALIZATION_ERROR: u32 = 9002;
    pub const IO_ERROR: u32 = 9003;
}

impl KmsError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            KmsError::DeviceUnavailable { error_code, .. } => *error_code,
            KmsError::DeviceOperationFailed { error_code, .. } => *error_code,
            KmsError::KeyNotFound { error_code, .. } => *error_code,
            KmsError::InvalidInput { error_code, .. } => *error_code,
            KmsError::Configuration(_) => error_codes::CONFIGURATION_ERROR,
            KmsError::Serialization(_) => error_codes::SERIALIZATION_ERROR,
            KmsError::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Get the error category as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            KmsError::DeviceUnavailable { .. } => "DeviceUnavailable",
            KmsError::DeviceOperationFailed { .. } => "DeviceOperationFailed",
            KmsError::KeyNotFound { .. } => "KeyNotFound",
            KmsError::InvalidInput { .. } => "InvalidInput",
            KmsError::Configuration(_) => "Configuration",
            KmsError::Serialization(_) => "Serialization",
            KmsError::Io(_) => "Io",
        }
    }

    /// Response class a transport should report for this error
    pub fn status_class(&self) -> StatusClass {
        match self {
            KmsError::KeyNotFound { .. } => StatusClass::NotFound,
            KmsError::InvalidInput { .. } | KmsError::Serialization(_) => StatusClass::BadRequest,
            _ => StatusClass::Internal,
        }
    }

    /// Whether a caller could reasonably try the same call again later.
    ///
    /// Only a device that could not be reached qualifies; nothing in this
    /// crate retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(self, KmsError::DeviceUnavailable { .. })
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            KmsError::DeviceUnavailable { operation, .. } => format!(
                "The security device could not be reached during '{}'. Try again later.",
                operation
            ),
            KmsError::DeviceOperationFailed { operation, .. } => format!(
                "The security device rejected '{}'. The key may have been sealed by a previous device owner.",
                operation
            ),
            KmsError::KeyNotFound { key_id, .. } => format!("No key with id '{}' exists.", key_id),
            KmsError::InvalidInput {
                parameter,
                expected,
                ..
            } => format!("Invalid parameter '{}'. Expected {}.", parameter, expected),
            KmsError::Configuration(_) => {
                "Service configuration is invalid. Check the configuration file.".to_string()
            }
            KmsError::Serialization(_) => "Request or response body is malformed.".to_string(),
            KmsError::Io(_) => {
                "Input/output operation failed. Check file permissions.".to_string()
            }
        }
    }

    /// Get technical details for debugging
    pub fn technical_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();

        details.insert("error_code".to_string(), self.error_code().to_string());
        details.insert("error_type".to_string(), self.error_type().to_string());
        details.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        match self {
            KmsError::DeviceUnavailable {
                operation, cause, ..
            }
            | KmsError::DeviceOperationFailed {
                operation, cause, ..
            } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("cause".to_string(), cause.clone());
            }
            KmsError::KeyNotFound { key_id, .. } => {
                details.insert("key_id".to_string(), key_id.clone());
            }
            KmsError::InvalidInput {
                parameter,
                expected,
                actual,
                ..
            } => {
                details.insert("parameter".to_string(), parameter.clone());
                details.insert("expected".to_string(), expected.clone());
                details.insert("actual".to_string(), actual.clone());
            }
            _ => {
                details.insert("details".to_string(), self.to_string());
            }
        }

        details
    }
}

/// Convenience constructors for common error types
impl KmsError {
    pub fn device_unavailable(operation: &str, cause: &str) -> Self {
        KmsError::DeviceUnavailable {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code: error_codes::DEVICE_SESSION_FAILED,
        }
    }

    pub fn device_failed(operation: &str, cause: &str, error_code: u32) -> Self {
        KmsError::DeviceOperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn key_not_found(key_id: &str) -> Self {
        KmsError::KeyNotFound {
            key_id: key_id.to_string(),
            error_code: error_codes::KEY_NOT_FOUND,
        }
    }

    pub fn invalid_input(parameter: &str, expected: &str, actual: &str, error_code: u32) -> Self {
        KmsError::InvalidInput {
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            error_code,
        }
    }
}

impl From<std::io::Error> for KmsError {
    fn from(err: std::io::Error) -> Self {
        KmsError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KmsError {
    fn from(err: serde_json::Error) -> Self {
        KmsError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for KmsError {
    fn from(err: base64::DecodeError) -> Self {
        KmsError::invalid_input(
            "key",
            "base64-encoded bytes",
            &err.to_string(),
            error_codes::INVALID_KEY_MATERIAL,
        )
    }
}

/// Result type alias for key management operations
pub type KmsResult<T> = Result<T, KmsError>;
