//! HTTP handlers for the queue service
//!
//! Every operation is a `POST /` whose `x-mqstack-target` header names the
//! operation and whose body is a snake_case JSON document. Responses are
//! JSON; failures carry `{"__type", "message"}` and an `x-request-id`.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use mqstack_core::{ApiError, ErrorCode, RequestId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dispatcher::ReceiveOptions;
use crate::error::SqsError;
use crate::message::{
    MessageAttributeValue, MessageAttributes, MessageId, ReceiptHandle, ReceivedMessage,
};
use crate::state::SqsState;

pub const TARGET_HEADER: &str = "x-mqstack-target";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// === Wire types ===

/// A message attribute as it travels over HTTP. Binary values are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessageAttribute {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<String>,
}

impl WireMessageAttribute {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: "String".into(),
            string_value: Some(value.into()),
            binary_value: None,
        }
    }

    pub fn number(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            data_type: "Number".into(),
            string_value: Some(value.to_string()),
            binary_value: None,
        }
    }

    pub fn binary(name: impl Into<String>, value: &[u8]) -> Self {
        Self {
            name: name.into(),
            data_type: "Binary".into(),
            string_value: None,
            binary_value: Some(STANDARD.encode(value)),
        }
    }

    fn into_value(self) -> Result<(String, MessageAttributeValue), SqsError> {
        let missing = |field: &str| {
            SqsError::InvalidAttributeValue(format!(
                "Message attribute '{}' of type {} requires {field}",
                self.name, self.data_type
            ))
        };
        let value = match self.data_type.as_str() {
            "String" => MessageAttributeValue::String(
                self.string_value.clone().ok_or_else(|| missing("string_value"))?,
            ),
            "Number" => MessageAttributeValue::Number(
                self.string_value.clone().ok_or_else(|| missing("string_value"))?,
            ),
            "Binary" => {
                let encoded = self.binary_value.as_deref().ok_or_else(|| missing("binary_value"))?;
                let bytes = STANDARD.decode(encoded).map_err(|e| {
                    SqsError::InvalidAttributeValue(format!(
                        "Message attribute '{}' is not valid base64: {e}",
                        self.name
                    ))
                })?;
                MessageAttributeValue::Binary(bytes)
            }
            other => {
                return Err(SqsError::InvalidAttributeValue(format!(
                    "Message attribute '{}' has unsupported data type {other}",
                    self.name
                )))
            }
        };
        Ok((self.name, value))
    }

    fn from_value(name: &str, value: &MessageAttributeValue) -> Self {
        match value {
            MessageAttributeValue::String(s) => Self::string(name, s.as_str()),
            MessageAttributeValue::Number(n) => Self::number(name, n),
            MessageAttributeValue::Binary(b) => Self::binary(name, b),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueRequest {
    pub queue_name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateQueueRequest {
    pub queue_name: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQueuesRequest {
    pub queue_name_prefix: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SendMessageRequest {
    pub queue_name: Option<String>,
    pub message_body: Option<String>,
    pub message_attributes: Vec<WireMessageAttribute>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveMessageRequest {
    pub queue_name: Option<String>,
    pub max_number_of_messages: Option<u32>,
    pub wait_time_seconds: Option<u32>,
    pub visibility_timeout: Option<u32>,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteMessageRequest {
    pub queue_name: Option<String>,
    pub receipt_handle: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeMessageVisibilityRequest {
    pub queue_name: Option<String>,
    pub receipt_handle: Option<String>,
    pub visibility_timeout: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetQueueAttributesRequest {
    pub queue_name: Option<String>,
    pub attribute_names: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetQueueAttributesRequest {
    pub queue_name: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResponse {
    pub queue_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueNamesResponse {
    pub queue_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: MessageId,
    pub md5_of_message_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_of_message_attributes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub message_id: MessageId,
    pub receipt_handle: String,
    pub body: String,
    pub md5_of_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_of_message_attributes: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub message_attributes: Vec<WireMessageAttribute>,
}

impl From<ReceivedMessage> for WireMessage {
    fn from(m: ReceivedMessage) -> Self {
        Self {
            message_id: m.message_id,
            receipt_handle: m.receipt_handle.to_string(),
            body: m.body,
            md5_of_body: m.md5_of_body,
            md5_of_message_attributes: m.md5_of_message_attributes,
            attributes: m.attributes,
            message_attributes: wire_attributes(&m.message_attributes),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiveMessageResponse {
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetQueueAttributesResponse {
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeQueueResponse {
    pub purged: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyResponse {}

fn wire_attributes(attributes: &MessageAttributes) -> Vec<WireMessageAttribute> {
    attributes
        .iter()
        .map(|(name, value)| WireMessageAttribute::from_value(name, value))
        .collect()
}

// === Dispatch ===

/// Handle queue requests based on the `x-mqstack-target` header
pub async fn handle_request(
    State(state): State<Arc<SqsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = RequestId::new();
    let target = headers
        .get(TARGET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    debug!(target = %target, request_id = %request_id, "Queue request");

    let result = match target {
        "CreateQueue" => handle_create_queue(&state, &body),
        "GetQueue" => handle_get_queue(&state, &body),
        "DeleteQueue" => handle_delete_queue(&state, &body),
        "ListQueues" => handle_list_queues(&state, &body),
        "SendMessage" => handle_send_message(&state, &body),
        "ReceiveMessage" => handle_receive_message(&state, &body).await,
        "DeleteMessage" => handle_delete_message(&state, &body),
        "ChangeMessageVisibility" => handle_change_message_visibility(&state, &body),
        "GetQueueAttributes" => handle_get_queue_attributes(&state, &body),
        "SetQueueAttributes" => handle_set_queue_attributes(&state, &body),
        "PurgeQueue" => handle_purge_queue(&state, &body),
        "ListDeadLetterSourceQueues" => handle_list_dead_letter_source_queues(&state, &body),
        _ => {
            warn!(target = %target, "Unknown queue operation");
            Err(ApiError::new(
                ErrorCode::UnknownOperation,
                format!("Unknown operation: {target}"),
            ))
        }
    };

    match result {
        Ok(json) => json_response(StatusCode::OK, json, &request_id),
        Err(err) => {
            debug!(code = %err.code, message = %err.message, "Request failed");
            error_response(err.with_request_id(request_id.as_str()), &request_id)
        }
    }
}

type HandlerResult = Result<String, ApiError>;

// === Handlers ===

fn handle_create_queue(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: CreateQueueRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    let queue = state.create_queue(&name, &req.attributes)?;
    to_json(&QueueResponse {
        queue_name: queue.name().to_string(),
    })
}

fn handle_get_queue(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: QueueRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    let queue = state.get_queue(&name)?;
    to_json(&QueueResponse {
        queue_name: queue.name().to_string(),
    })
}

fn handle_delete_queue(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: QueueRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    state.delete_queue(&name);
    to_json(&EmptyResponse {})
}

fn handle_list_queues(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: ListQueuesRequest = parse(body)?;
    to_json(&QueueNamesResponse {
        queue_names: state.list_queues(req.queue_name_prefix.as_deref()),
    })
}

fn handle_send_message(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: SendMessageRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    // An absent body is rejected by body validation like an empty one.
    let message_body = req.message_body.unwrap_or_default();
    let attributes = req
        .message_attributes
        .into_iter()
        .map(WireMessageAttribute::into_value)
        .collect::<Result<Vec<_>, _>>()?;

    let sent = state.send_message(&name, message_body, attributes)?;
    to_json(&SendMessageResponse {
        message_id: sent.message_id,
        md5_of_message_body: sent.md5_of_message_body,
        md5_of_message_attributes: sent.md5_of_message_attributes,
    })
}

async fn handle_receive_message(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: ReceiveMessageRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    let options = ReceiveOptions {
        max_messages: req.max_number_of_messages.unwrap_or(1),
        wait_time_seconds: req.wait_time_seconds,
        visibility_timeout: req.visibility_timeout,
        attribute_names: req.attribute_names,
        message_attribute_names: req.message_attribute_names,
    };

    let messages = state.receive_message(&name, &options).await?;
    to_json(&ReceiveMessageResponse {
        messages: messages.into_iter().map(WireMessage::from).collect(),
    })
}

fn handle_delete_message(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: DeleteMessageRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    let handle = ReceiptHandle::from(required(req.receipt_handle, "ReceiptHandle")?);
    state.delete_message(&name, &handle)?;
    to_json(&EmptyResponse {})
}

fn handle_change_message_visibility(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: ChangeMessageVisibilityRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    let handle = ReceiptHandle::from(required(req.receipt_handle, "ReceiptHandle")?);
    let timeout = required(req.visibility_timeout, "VisibilityTimeout")?;
    state.change_message_visibility(&name, &handle, timeout)?;
    to_json(&EmptyResponse {})
}

fn handle_get_queue_attributes(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: GetQueueAttributesRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    let attributes = state.get_queue_attributes(&name, &req.attribute_names)?;
    to_json(&GetQueueAttributesResponse { attributes })
}

fn handle_set_queue_attributes(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: SetQueueAttributesRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    state.set_queue_attributes(&name, &req.attributes)?;
    to_json(&EmptyResponse {})
}

fn handle_purge_queue(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: QueueRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    let purged = state.purge_queue(&name)?;
    to_json(&PurgeQueueResponse { purged })
}

fn handle_list_dead_letter_source_queues(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: QueueRequest = parse(body)?;
    let name = required(req.queue_name, "QueueName")?;
    to_json(&QueueNamesResponse {
        queue_names: state.list_dead_letter_source_queues(&name)?,
    })
}

// === Helpers ===

/// Decode a request body; an empty body is an empty request.
fn parse<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(ErrorCode::MalformedRequest, format!("Invalid JSON body: {e}")))
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| SqsError::MissingParameter(field.to_string()).into())
}

fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_string(value)
        .map_err(|e| ApiError::new(ErrorCode::InternalFailure, e.to_string()))
}

fn json_response(status: StatusCode, body: String, request_id: &RequestId) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn error_response(err: ApiError, request_id: &RequestId) -> Response {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, err.to_json(), request_id)
}
