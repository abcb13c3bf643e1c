//! Message records, identifiers and content validation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SqsError;

pub const MAX_MESSAGE_ATTRIBUTES: usize = 10;
pub const MAX_ATTRIBUTE_NAME_LENGTH: usize = 256;

/// Server-assigned message identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Token bound to exactly one delivery of a message.
///
/// Encodes the message id so the owning record can be found without a side
/// index; the random nonce makes every delivery's handle distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub(crate) fn issue(message_id: MessageId, receive_count: u32) -> Self {
        let raw = format!("{message_id}:{receive_count}:{}", Uuid::new_v4().simple());
        Self(URL_SAFE_NO_PAD.encode(raw))
    }

    /// The message this handle was issued for, if the handle is well formed.
    pub fn message_id(&self) -> Option<MessageId> {
        let raw = URL_SAFE_NO_PAD.decode(&self.0).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        raw.split(':').next()?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ReceiptHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReceiptHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed message attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "data_type", content = "value")]
pub enum MessageAttributeValue {
    String(String),
    /// Decimal number kept in its original textual form
    Number(String),
    Binary(Vec<u8>),
}

impl MessageAttributeValue {
    pub fn data_type(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Number(_) => "Number",
            Self::Binary(_) => "Binary",
        }
    }

    fn transport_type(&self) -> u8 {
        match self {
            Self::String(_) | Self::Number(_) => 1,
            Self::Binary(_) => 2,
        }
    }

    fn value_bytes(&self) -> &[u8] {
        match self {
            Self::String(s) | Self::Number(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    fn validate(&self, name: &str) -> Result<(), SqsError> {
        match self {
            Self::String(s) => {
                if s.is_empty() {
                    return Err(SqsError::InvalidAttributeValue(format!(
                        "Message attribute '{name}' must have a non-empty value"
                    )));
                }
                if let Some(c) = s.chars().find(|c| !is_allowed_char(*c)) {
                    return Err(SqsError::InvalidAttributeValue(format!(
                        "Message attribute '{name}' contains invalid character U+{:04X}",
                        c as u32
                    )));
                }
            }
            Self::Number(n) => {
                let valid = n.trim().parse::<f64>().is_ok_and(f64::is_finite);
                if !valid {
                    return Err(SqsError::InvalidAttributeValue(format!(
                        "Message attribute '{name}' is not a valid number: {n}"
                    )));
                }
            }
            Self::Binary(b) => {
                if b.is_empty() {
                    return Err(SqsError::InvalidAttributeValue(format!(
                        "Message attribute '{name}' must have a non-empty value"
                    )));
                }
            }
        }
        Ok(())
    }
}

pub type MessageAttributes = BTreeMap<String, MessageAttributeValue>;

/// Validate caller-supplied attributes, rejecting duplicate names.
pub fn validate_message_attributes(
    attributes: Vec<(String, MessageAttributeValue)>,
) -> Result<MessageAttributes, SqsError> {
    if attributes.len() > MAX_MESSAGE_ATTRIBUTES {
        return Err(SqsError::InvalidParameterValue(format!(
            "Number of message attributes [{}] exceeds the maximum [{MAX_MESSAGE_ATTRIBUTES}]",
            attributes.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut validated = MessageAttributes::new();
    for (name, value) in attributes {
        validate_attribute_name(&name)?;
        if !seen.insert(name.clone()) {
            return Err(SqsError::InvalidAttributeName(format!(
                "Message attribute name '{name}' is used more than once"
            )));
        }
        value.validate(&name)?;
        validated.insert(name, value);
    }
    Ok(validated)
}

fn validate_attribute_name(name: &str) -> Result<(), SqsError> {
    let invalid = |reason: &str| {
        Err(SqsError::InvalidAttributeName(format!(
            "Message attribute name '{name}' {reason}"
        )))
    };

    if name.is_empty() || name.len() > MAX_ATTRIBUTE_NAME_LENGTH {
        return invalid("must be between 1 and 256 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("contains invalid characters");
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return invalid("must not start or end with a period or contain consecutive periods");
    }
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("aws.") || lower.starts_with("amazon.") {
        return invalid("uses a reserved prefix");
    }
    Ok(())
}

/// Characters permitted in message bodies and string attribute values:
/// tab, newline, carriage return, and everything from U+0020 up except the
/// U+FFFE/U+FFFF non-characters (surrogates cannot occur in a `str`).
pub fn is_allowed_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n'
            | '\r'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}

/// Reject empty, oversized, or non-conforming bodies. Size is measured in
/// UTF-8 bytes.
pub fn validate_body(body: &str, max_size: usize) -> Result<(), SqsError> {
    if body.is_empty() {
        return Err(SqsError::InvalidBody("Message body must not be empty".into()));
    }
    if body.len() > max_size {
        return Err(SqsError::MessageTooLong {
            size: body.len(),
            max: max_size,
        });
    }
    if let Some(c) = body.chars().find(|c| !is_allowed_char(*c)) {
        return Err(SqsError::InvalidBody(format!(
            "Invalid character U+{:04X} in message body",
            c as u32
        )));
    }
    Ok(())
}

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint over sorted attributes: for each, length-prefixed name and
/// data type, a transport byte, then the length-prefixed value.
pub fn md5_of_attributes(attributes: &MessageAttributes) -> Option<String> {
    if attributes.is_empty() {
        return None;
    }

    let mut buf = Vec::new();
    for (name, value) in attributes {
        push_length_prefixed(&mut buf, name.as_bytes());
        push_length_prefixed(&mut buf, value.data_type().as_bytes());
        buf.push(value.transport_type());
        push_length_prefixed(&mut buf, value.value_bytes());
    }
    Some(md5_hex(&buf))
}

fn push_length_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Delivery state of a stored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Available,
    InFlight {
        receipt_handle: ReceiptHandle,
        deadline: Instant,
    },
}

/// A message held by a queue
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub body: String,
    pub md5_of_body: String,
    pub attributes: MessageAttributes,
    pub md5_of_message_attributes: Option<String>,
    /// Epoch millis
    pub sent_timestamp: i64,
    pub receive_count: u32,
    pub first_receive_timestamp: Option<i64>,
    pub delivery: Delivery,
}

impl Message {
    pub fn new(body: String, attributes: MessageAttributes) -> Self {
        Self {
            id: MessageId::new(),
            md5_of_body: md5_hex(body.as_bytes()),
            md5_of_message_attributes: md5_of_attributes(&attributes),
            body,
            attributes,
            sent_timestamp: chrono::Utc::now().timestamp_millis(),
            receive_count: 0,
            first_receive_timestamp: None,
            delivery: Delivery::Available,
        }
    }

    /// Validate caller input and build an available message. Nothing is
    /// constructed unless the body and every attribute pass.
    pub fn validated(
        body: String,
        attributes: Vec<(String, MessageAttributeValue)>,
        max_size: usize,
    ) -> Result<Self, SqsError> {
        validate_body(&body, max_size)?;
        let attributes = validate_message_attributes(attributes)?;
        Ok(Self::new(body, attributes))
    }

    /// The copy placed in a dead-letter queue: same content under a fresh
    /// identity, never received.
    pub fn redriven(self) -> Self {
        let sent_timestamp = self.sent_timestamp;
        Self {
            sent_timestamp,
            ..Self::new(self.body, self.attributes)
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.delivery, Delivery::Available)
    }

    pub fn receipt_handle(&self) -> Option<&ReceiptHandle> {
        match &self.delivery {
            Delivery::InFlight { receipt_handle, .. } => Some(receipt_handle),
            Delivery::Available => None,
        }
    }
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub md5_of_message_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_of_message_attributes: Option<String>,
}

/// A message as handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    pub md5_of_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_of_message_attributes: Option<String>,
    /// Requested system attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Requested message attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub message_attributes: MessageAttributes,
}
