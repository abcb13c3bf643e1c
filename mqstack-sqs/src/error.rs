//! Queue engine errors

use mqstack_core::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqsError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
    #[error("Invalid queue name: {0}")]
    InvalidName(String),
    #[error("Invalid message contents: {0}")]
    InvalidBody(String),
    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLong { size: usize, max: usize },
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),
    #[error("Invalid attribute name: {0}")]
    InvalidAttributeName(String),
    #[error("Invalid attribute value: {0}")]
    InvalidAttributeValue(String),
    #[error("Invalid parameter value: {0}")]
    InvalidParameterValue(String),
    #[error("Message is not in flight: {0}")]
    MessageNotInflight(String),
}

impl SqsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingParameter(_) => ErrorCode::MissingParameter,
            Self::InvalidName(_) | Self::InvalidParameterValue(_) => {
                ErrorCode::InvalidParameterValue
            }
            Self::InvalidBody(_) => ErrorCode::InvalidMessageContents,
            Self::MessageTooLong { .. } => ErrorCode::MessageTooLong,
            Self::QueueNotFound(_) => ErrorCode::QueueDoesNotExist,
            Self::InvalidAttributeName(_) => ErrorCode::InvalidAttributeName,
            Self::InvalidAttributeValue(_) => ErrorCode::InvalidAttributeValue,
            Self::MessageNotInflight(_) => ErrorCode::MessageNotInflight,
        }
    }
}

impl From<SqsError> for ApiError {
    fn from(err: SqsError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SqsError::InvalidName("a!".into()).code(),
            ErrorCode::InvalidParameterValue
        );
        assert_eq!(
            SqsError::MessageTooLong { size: 10, max: 5 }.code(),
            ErrorCode::MessageTooLong
        );
        assert_eq!(
            SqsError::InvalidBody("empty".into()).code(),
            ErrorCode::InvalidMessageContents
        );
    }

    #[test]
    fn test_into_api_error() {
        let api: ApiError = SqsError::QueueNotFound("orders".into()).into();
        assert_eq!(api.code, ErrorCode::QueueDoesNotExist);
        assert!(api.message.contains("orders"));
    }
}
