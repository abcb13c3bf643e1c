//! Wire error codes and formatting

use serde::Serialize;
use thiserror::Error;

/// Error codes returned to queue clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Request shape
    MissingParameter,
    MalformedRequest,
    UnknownOperation,

    // Validation
    InvalidParameterValue,
    InvalidMessageContents,
    MessageTooLong,
    InvalidAttributeName,
    InvalidAttributeValue,

    // Resources
    QueueDoesNotExist,
    MessageNotInflight,

    InternalFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingParameter => "MissingParameter",
            Self::MalformedRequest => "MalformedRequest",
            Self::UnknownOperation => "UnknownOperation",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::InvalidMessageContents => "InvalidMessageContents",
            Self::MessageTooLong => "MessageTooLong",
            Self::InvalidAttributeName => "InvalidAttributeName",
            Self::InvalidAttributeValue => "InvalidAttributeValue",
            Self::QueueDoesNotExist => "QueueDoesNotExist",
            Self::MessageNotInflight => "MessageNotInflight",
            Self::InternalFailure => "InternalFailure",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InternalFailure => 500,
            _ => 400,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned over the wire
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Format as a JSON error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: &'a str,
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            request_id: Option<&'a str>,
        }

        let error = JsonError {
            error_type: self.code.as_str(),
            message: &self.message,
            request_id: self.request_id.as_deref(),
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(
                r#"{{"__type":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_format() {
        let error = ApiError::new(ErrorCode::QueueDoesNotExist, "queue does not exist: orders")
            .with_request_id("test-request-id");

        let json: serde_json::Value = serde_json::from_str(&error.to_json()).unwrap();
        assert_eq!(json["__type"], "QueueDoesNotExist");
        assert_eq!(json["message"], "queue does not exist: orders");
        assert_eq!(json["request_id"], "test-request-id");
    }

    #[test]
    fn test_error_json_escapes_message() {
        let error = ApiError::new(ErrorCode::InvalidMessageContents, "bad \"quote\"");
        let json: serde_json::Value = serde_json::from_str(&error.to_json()).unwrap();
        assert_eq!(json["message"], "bad \"quote\"");
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorCode::MissingParameter.http_status(), 400);
        assert_eq!(ErrorCode::MessageTooLong.http_status(), 400);
        assert_eq!(ErrorCode::InternalFailure.http_status(), 500);
    }
}
