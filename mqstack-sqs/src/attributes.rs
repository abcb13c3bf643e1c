//! Queue attributes and redrive policy

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SqsError;

pub const DEFAULT_VISIBILITY_TIMEOUT: u32 = 30;
pub const MAX_VISIBILITY_TIMEOUT: u32 = 43_200;
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;
pub const MIN_MESSAGE_SIZE_LIMIT: u32 = 1024;
/// 256 KiB
pub const MAX_MESSAGE_SIZE: u32 = 262_144;
pub const MAX_RECEIVE_COUNT_LIMIT: u32 = 1000;

/// Names accepted by GetQueueAttributes / SetQueueAttributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAttributeName {
    All,
    VisibilityTimeout,
    ReceiveMessageWaitTimeSeconds,
    MaximumMessageSize,
    RedrivePolicy,
    QueueName,
    CreatedTimestamp,
    LastModifiedTimestamp,
    ApproximateNumberOfMessages,
    ApproximateNumberOfMessagesNotVisible,
}

impl QueueAttributeName {
    /// Every concrete attribute, i.e. what `All` expands to.
    pub const READABLE: [Self; 9] = [
        Self::VisibilityTimeout,
        Self::ReceiveMessageWaitTimeSeconds,
        Self::MaximumMessageSize,
        Self::RedrivePolicy,
        Self::QueueName,
        Self::CreatedTimestamp,
        Self::LastModifiedTimestamp,
        Self::ApproximateNumberOfMessages,
        Self::ApproximateNumberOfMessagesNotVisible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "All",
            Self::VisibilityTimeout => "VisibilityTimeout",
            Self::ReceiveMessageWaitTimeSeconds => "ReceiveMessageWaitTimeSeconds",
            Self::MaximumMessageSize => "MaximumMessageSize",
            Self::RedrivePolicy => "RedrivePolicy",
            Self::QueueName => "QueueName",
            Self::CreatedTimestamp => "CreatedTimestamp",
            Self::LastModifiedTimestamp => "LastModifiedTimestamp",
            Self::ApproximateNumberOfMessages => "ApproximateNumberOfMessages",
            Self::ApproximateNumberOfMessagesNotVisible => "ApproximateNumberOfMessagesNotVisible",
        }
    }

    pub fn is_settable(&self) -> bool {
        matches!(
            self,
            Self::VisibilityTimeout
                | Self::ReceiveMessageWaitTimeSeconds
                | Self::MaximumMessageSize
                | Self::RedrivePolicy
        )
    }
}

impl FromStr for QueueAttributeName {
    type Err = SqsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "All" {
            return Ok(Self::All);
        }
        Self::READABLE
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| SqsError::InvalidAttributeName(format!("Unknown attribute: {s}")))
    }
}

/// Moves messages to a dead-letter queue once they have been received
/// `max_receive_count` times without being deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
    pub dead_letter_target: String,
}

impl RedrivePolicy {
    pub fn new(dead_letter_target: impl Into<String>, max_receive_count: u32) -> Self {
        Self {
            max_receive_count,
            dead_letter_target: dead_letter_target.into(),
        }
    }

    /// Parse `{"maxReceiveCount": 5, "deadLetterTarget": "dlq"}`. The count
    /// may also be given as a numeric string.
    pub fn from_json(s: &str) -> Result<Self, SqsError> {
        let v: serde_json::Value = serde_json::from_str(s).map_err(|e| {
            SqsError::InvalidAttributeValue(format!("Invalid RedrivePolicy JSON: {e}"))
        })?;

        let target = v
            .get("deadLetterTarget")
            .and_then(serde_json::Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SqsError::InvalidAttributeValue(
                    "RedrivePolicy must contain deadLetterTarget".into(),
                )
            })?;

        let max_receive_count = v
            .get("maxReceiveCount")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| {
                SqsError::InvalidAttributeValue("RedrivePolicy must contain maxReceiveCount".into())
            })?;

        let max_receive_count = u32::try_from(max_receive_count)
            .ok()
            .filter(|c| (1..=MAX_RECEIVE_COUNT_LIMIT).contains(c))
            .ok_or_else(|| {
                SqsError::InvalidAttributeValue(format!(
                    "maxReceiveCount must be between 1 and {MAX_RECEIVE_COUNT_LIMIT}"
                ))
            })?;

        Ok(Self::new(target, max_receive_count))
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "maxReceiveCount": self.max_receive_count,
            "deadLetterTarget": self.dead_letter_target,
        })
        .to_string()
    }
}

/// Settable queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueAttributes {
    pub visibility_timeout: u32,
    pub receive_message_wait_time_seconds: u32,
    pub maximum_message_size: u32,
    #[serde(skip)]
    pub redrive_policy: Option<RedrivePolicy>,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            receive_message_wait_time_seconds: 0,
            maximum_message_size: MAX_MESSAGE_SIZE,
            redrive_policy: None,
        }
    }
}

impl QueueAttributes {
    /// Returns a copy with `attrs` applied. Nothing is applied unless every
    /// entry is valid.
    pub fn with_applied(&self, attrs: &HashMap<String, String>) -> Result<Self, SqsError> {
        let mut next = self.clone();
        for (key, value) in attrs {
            let name: QueueAttributeName = key.parse()?;
            match name {
                QueueAttributeName::VisibilityTimeout => {
                    next.visibility_timeout = parse_u32(key, value)?;
                }
                QueueAttributeName::ReceiveMessageWaitTimeSeconds => {
                    next.receive_message_wait_time_seconds = parse_u32(key, value)?;
                }
                QueueAttributeName::MaximumMessageSize => {
                    next.maximum_message_size = parse_u32(key, value)?;
                }
                QueueAttributeName::RedrivePolicy => {
                    next.redrive_policy = if value.is_empty() {
                        None
                    } else {
                        Some(RedrivePolicy::from_json(value)?)
                    };
                }
                _ => {
                    return Err(SqsError::InvalidAttributeName(format!(
                        "{} cannot be set",
                        name.as_str()
                    )));
                }
            }
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), SqsError> {
        if self.visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(SqsError::InvalidAttributeValue(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        if self.receive_message_wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(SqsError::InvalidAttributeValue(format!(
                "ReceiveMessageWaitTimeSeconds must be between 0 and {MAX_WAIT_TIME_SECONDS}"
            )));
        }
        if !(MIN_MESSAGE_SIZE_LIMIT..=MAX_MESSAGE_SIZE).contains(&self.maximum_message_size) {
            return Err(SqsError::InvalidAttributeValue(format!(
                "MaximumMessageSize must be between {MIN_MESSAGE_SIZE_LIMIT} and {MAX_MESSAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_timeout))
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(
            QueueAttributeName::VisibilityTimeout.as_str().into(),
            self.visibility_timeout.to_string(),
        );
        m.insert(
            QueueAttributeName::ReceiveMessageWaitTimeSeconds.as_str().into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        m.insert(
            QueueAttributeName::MaximumMessageSize.as_str().into(),
            self.maximum_message_size.to_string(),
        );
        if let Some(ref rp) = self.redrive_policy {
            m.insert(QueueAttributeName::RedrivePolicy.as_str().into(), rp.to_json());
        }
        m
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, SqsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SqsError::InvalidAttributeValue(format!("Invalid {key}: {value}")))
}
