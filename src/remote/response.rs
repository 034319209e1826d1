//! One result shape for every request outcome.
//!
//! Successful bodies arrive in one of two accepted shapes:
//!
//! - **Envelope**: an object carrying a status (`status`, `statusCode` or
//!   `status_code`) together with `data` and/or `message`.
//! - **Raw**: anything else. The whole body is the payload and the HTTP
//!   status is the status.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

pub mod error_codes {
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
}

pub mod messages {
    pub const NETWORK_ERROR: &str = "No internet connection. Please check your network.";
    pub const TIMEOUT: &str = "Request timed out. Please try again.";
    pub const UNAUTHORIZED: &str = "Session expired. Please log in again.";
    pub const SERVER_ERROR: &str = "Something went wrong. Please try again later.";
    pub const PARSE_ERROR: &str = "Unexpected response from server.";
}

const STATUS_KEYS: [&str; 3] = ["statusCode", "status_code", "status"];
const SUCCESS_KEYS: [&str; 2] = ["success", "succeeded"];
const ERROR_CODE_KEYS: [&str; 3] = ["errorCode", "error_code", "code"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    status_code: u16,
    succeeded: bool,
    message: Option<String>,
    data: Option<T>,
    error_code: Option<String>,
}

/// The failure half of an [`ApiResponse`], for callers that prefer `?`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({error_code}, status {status_code})")]
pub struct ApiFailure {
    pub status_code: u16,
    pub error_code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(status_code: u16, data: Option<T>, message: Option<String>) -> Self {
        Self {
            status_code,
            succeeded: true,
            message,
            data,
            error_code: None,
        }
    }

    pub fn failure(
        status_code: u16,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status_code,
            succeeded: false,
            message: Some(message.into()),
            data: None,
            error_code: Some(error_code.into()),
        }
    }

    pub fn network_error() -> Self {
        Self::failure(0, error_codes::NETWORK_ERROR, messages::NETWORK_ERROR)
    }

    pub fn timeout() -> Self {
        Self::failure(408, error_codes::TIMEOUT, messages::TIMEOUT)
    }

    pub fn unauthorized() -> Self {
        Self::failure(401, error_codes::UNAUTHORIZED, messages::UNAUTHORIZED)
    }

    pub fn server_error(status_code: u16) -> Self {
        Self::failure(status_code, error_codes::SERVER_ERROR, messages::SERVER_ERROR)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn into_result(self) -> Result<Option<T>, ApiFailure> {
        if self.succeeded {
            return Ok(self.data);
        }
        Err(ApiFailure {
            status_code: self.status_code,
            error_code: self
                .error_code
                .unwrap_or_else(|| error_codes::SERVER_ERROR.to_string()),
            message: self
                .message
                .unwrap_or_else(|| messages::SERVER_ERROR.to_string()),
        })
    }

    /// Same outcome with a different payload type. Failures carry over as is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            status_code: self.status_code,
            succeeded: self.succeeded,
            message: self.message,
            data: self.data.map(f),
            error_code: self.error_code,
        }
    }
}

/// The fields an envelope may carry. Everything is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub status_code: Option<u16>,
    pub success: Option<bool>,
    pub message: Option<String>,
    pub data: Option<Value>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Envelope(Envelope),
    Raw(Option<Value>),
}

impl WireBody {
    /// Empty bodies carry no payload; non-JSON bodies are kept as a string.
    pub fn decode(bytes: &[u8]) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return WireBody::Raw(None);
        }
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Self::classify(value),
            Err(_) => WireBody::Raw(Some(Value::String(
                String::from_utf8_lossy(bytes).into_owned(),
            ))),
        }
    }

    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(map) if is_envelope(&map) => WireBody::Envelope(Envelope::from_map(map)),
            Value::Null => WireBody::Raw(None),
            other => WireBody::Raw(Some(other)),
        }
    }

    fn envelope(&self) -> Option<&Envelope> {
        match self {
            WireBody::Envelope(envelope) => Some(envelope),
            WireBody::Raw(_) => None,
        }
    }
}

fn is_envelope(map: &Map<String, Value>) -> bool {
    let has_status = STATUS_KEYS.iter().any(|k| map.contains_key(*k));
    let has_payload = map.contains_key("data") || map.contains_key("message");
    has_status && has_payload
}

impl Envelope {
    fn from_map(mut map: Map<String, Value>) -> Self {
        let mut envelope = Envelope::default();

        for key in STATUS_KEYS {
            match map.get(key) {
                Some(Value::Number(n)) => {
                    envelope.status_code = n.as_u64().and_then(|n| u16::try_from(n).ok());
                }
                Some(Value::String(s)) => envelope.status_code = s.trim().parse().ok(),
                Some(Value::Bool(b)) => envelope.success = Some(*b),
                _ => continue,
            }
            break;
        }

        if let Some(success) = SUCCESS_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_bool))
        {
            envelope.success = Some(success);
        }

        envelope.message = match map.remove("message") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        envelope.data = match map.remove("data") {
            Some(Value::Null) | None => None,
            Some(data) => Some(data),
        };

        envelope.error_code = ERROR_CODE_KEYS.iter().find_map(|k| match map.get(*k) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });

        envelope
    }
}

/// Normalize a 2xx response body.
pub fn from_success<T: DeserializeOwned>(http_status: u16, body: WireBody) -> ApiResponse<T> {
    match body {
        WireBody::Raw(data) => decode_data(http_status, data, None),
        WireBody::Envelope(envelope) => {
            let status = envelope.status_code.unwrap_or(http_status);
            let succeeded = envelope
                .success
                .unwrap_or_else(|| (200..300).contains(&status));
            if succeeded {
                decode_data(status, envelope.data, envelope.message)
            } else if status == 401 {
                ApiResponse::unauthorized()
            } else {
                ApiResponse::failure(
                    status,
                    envelope
                        .error_code
                        .unwrap_or_else(|| error_codes::SERVER_ERROR.to_string()),
                    envelope
                        .message
                        .unwrap_or_else(|| messages::SERVER_ERROR.to_string()),
                )
            }
        }
    }
}

/// Normalize a non-2xx response.
pub fn from_error_status<T>(http_status: u16, body: &WireBody) -> ApiResponse<T> {
    if http_status == 401 {
        return ApiResponse::unauthorized();
    }
    let envelope = body.envelope();
    ApiResponse::failure(
        http_status,
        envelope
            .and_then(|e| e.error_code.clone())
            .unwrap_or_else(|| error_codes::SERVER_ERROR.to_string()),
        envelope
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| messages::SERVER_ERROR.to_string()),
    )
}

/// Normalize a failure below HTTP: connect, timeout, body read, builder.
pub fn from_transport_error<T>(err: &reqwest::Error) -> ApiResponse<T> {
    if err.is_timeout() {
        ApiResponse::timeout()
    } else if err.is_connect() {
        ApiResponse::network_error()
    } else if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
        ApiResponse::unauthorized()
    } else {
        ApiResponse::server_error(err.status().map(|s| s.as_u16()).unwrap_or(500))
    }
}

fn decode_data<T: DeserializeOwned>(
    status: u16,
    data: Option<Value>,
    message: Option<String>,
) -> ApiResponse<T> {
    let Some(data) = data else {
        return ApiResponse::success(status, None, message);
    };
    match serde_json::from_value(data) {
        Ok(data) => ApiResponse::success(status, Some(data), message),
        Err(e) => {
            log::warn!("Response payload did not match the expected type: {}", e);
            ApiResponse::failure(status, error_codes::PARSE_ERROR, messages::PARSE_ERROR)
        }
    }
}
