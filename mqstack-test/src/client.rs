//! Client helpers for the mqstack queue protocol

use mqstack_sqs::handlers::{
    ChangeMessageVisibilityRequest, CreateQueueRequest, DeleteMessageRequest, EmptyResponse,
    GetQueueAttributesRequest, GetQueueAttributesResponse, ListQueuesRequest, PurgeQueueResponse,
    QueueNamesResponse, QueueRequest, QueueResponse, ReceiveMessageRequest,
    ReceiveMessageResponse, SendMessageRequest, SendMessageResponse, SetQueueAttributesRequest,
    WireMessage, WireMessageAttribute, REQUEST_ID_HEADER, TARGET_HEADER,
};
use mqstack_core::ErrorCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Client for interacting with an mqstack server
#[derive(Debug, Clone)]
pub struct MqClient {
    client: reqwest::Client,
    base_url: String,
}

impl MqClient {
    /// Create a new client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one operation and decode its response.
    pub async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(TARGET_HEADER, operation)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response.text().await?;
        debug!(%operation, %status, %request_id, "Queue call");

        if !status.is_success() {
            let body: ErrorBody = serde_json::from_str(&text)
                .map_err(|e| ClientError::Parse(format!("{e}: {text}")))?;
            return Err(ClientError::Api {
                status: status.as_u16(),
                code: body.code,
                message: body.message,
                request_id,
            });
        }

        serde_json::from_str(&text).map_err(|e| ClientError::Parse(format!("{e}: {text}")))
    }

    // === Queue Operations ===

    pub async fn create_queue(&self, name: &str) -> Result<String, ClientError> {
        self.create_queue_with_attributes(name, HashMap::new()).await
    }

    pub async fn create_queue_with_attributes(
        &self,
        name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<String, ClientError> {
        let request = CreateQueueRequest {
            queue_name: Some(name.to_string()),
            attributes,
        };
        let response: QueueResponse = self.call("CreateQueue", &request).await?;
        Ok(response.queue_name)
    }

    pub async fn get_queue(&self, name: &str) -> Result<String, ClientError> {
        let response: QueueResponse = self.call("GetQueue", &queue_request(name)).await?;
        Ok(response.queue_name)
    }

    pub async fn delete_queue(&self, name: &str) -> Result<(), ClientError> {
        let _: EmptyResponse = self.call("DeleteQueue", &queue_request(name)).await?;
        Ok(())
    }

    pub async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>, ClientError> {
        let request = ListQueuesRequest {
            queue_name_prefix: prefix.map(str::to_string),
        };
        let response: QueueNamesResponse = self.call("ListQueues", &request).await?;
        Ok(response.queue_names)
    }

    pub async fn purge_queue(&self, name: &str) -> Result<usize, ClientError> {
        let response: PurgeQueueResponse = self.call("PurgeQueue", &queue_request(name)).await?;
        Ok(response.purged)
    }

    pub async fn get_queue_attributes(
        &self,
        name: &str,
        attribute_names: &[&str],
    ) -> Result<BTreeMap<String, String>, ClientError> {
        let request = GetQueueAttributesRequest {
            queue_name: Some(name.to_string()),
            attribute_names: attribute_names.iter().map(ToString::to_string).collect(),
        };
        let response: GetQueueAttributesResponse =
            self.call("GetQueueAttributes", &request).await?;
        Ok(response.attributes)
    }

    pub async fn set_queue_attributes(
        &self,
        name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), ClientError> {
        let request = SetQueueAttributesRequest {
            queue_name: Some(name.to_string()),
            attributes,
        };
        let _: EmptyResponse = self.call("SetQueueAttributes", &request).await?;
        Ok(())
    }

    pub async fn list_dead_letter_source_queues(
        &self,
        name: &str,
    ) -> Result<Vec<String>, ClientError> {
        let response: QueueNamesResponse = self
            .call("ListDeadLetterSourceQueues", &queue_request(name))
            .await?;
        Ok(response.queue_names)
    }

    // === Message Operations ===

    pub async fn send_message(
        &self,
        queue: &str,
        body: &str,
    ) -> Result<SendMessageResponse, ClientError> {
        self.send_message_with_attributes(queue, body, Vec::new())
            .await
    }

    pub async fn send_message_with_attributes(
        &self,
        queue: &str,
        body: &str,
        attributes: Vec<WireMessageAttribute>,
    ) -> Result<SendMessageResponse, ClientError> {
        let request = SendMessageRequest {
            queue_name: Some(queue.to_string()),
            message_body: Some(body.to_string()),
            message_attributes: attributes,
        };
        self.call("SendMessage", &request).await
    }

    /// Receive with the queue's defaults and a batch size of one.
    pub async fn receive_message(&self, queue: &str) -> Result<Vec<WireMessage>, ClientError> {
        self.receive(ReceiveRequest::new(queue)).await
    }

    pub async fn receive(&self, request: ReceiveRequest) -> Result<Vec<WireMessage>, ClientError> {
        let response: ReceiveMessageResponse =
            self.call("ReceiveMessage", &request.into_wire()).await?;
        Ok(response.messages)
    }

    pub async fn delete_message(
        &self,
        queue: &str,
        receipt_handle: &str,
    ) -> Result<(), ClientError> {
        let request = DeleteMessageRequest {
            queue_name: Some(queue.to_string()),
            receipt_handle: Some(receipt_handle.to_string()),
        };
        let _: EmptyResponse = self.call("DeleteMessage", &request).await?;
        Ok(())
    }

    pub async fn change_message_visibility(
        &self,
        queue: &str,
        receipt_handle: &str,
        visibility_timeout: u32,
    ) -> Result<(), ClientError> {
        let request = ChangeMessageVisibilityRequest {
            queue_name: Some(queue.to_string()),
            receipt_handle: Some(receipt_handle.to_string()),
            visibility_timeout: Some(visibility_timeout),
        };
        let _: EmptyResponse = self.call("ChangeMessageVisibility", &request).await?;
        Ok(())
    }
}

fn queue_request(name: &str) -> QueueRequest {
    QueueRequest {
        queue_name: Some(name.to_string()),
    }
}

/// Builder for a ReceiveMessage call
#[derive(Debug, Clone, Default)]
pub struct ReceiveRequest {
    queue: String,
    max_messages: Option<u32>,
    wait_time_seconds: Option<u32>,
    visibility_timeout: Option<u32>,
    attribute_names: Vec<String>,
    message_attribute_names: Vec<String>,
}

impl ReceiveRequest {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_messages(mut self, max: u32) -> Self {
        self.max_messages = Some(max);
        self
    }

    #[must_use]
    pub fn wait_time_seconds(mut self, seconds: u32) -> Self {
        self.wait_time_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout = Some(seconds);
        self
    }

    #[must_use]
    pub fn attribute_names(mut self, names: &[&str]) -> Self {
        self.attribute_names = names.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn message_attribute_names(mut self, names: &[&str]) -> Self {
        self.message_attribute_names = names.iter().map(ToString::to_string).collect();
        self
    }

    fn into_wire(self) -> ReceiveMessageRequest {
        ReceiveMessageRequest {
            queue_name: Some(self.queue),
            max_number_of_messages: self.max_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout: self.visibility_timeout,
            attribute_names: self.attribute_names,
            message_attribute_names: self.message_attribute_names,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    code: String,
    #[serde(default)]
    message: String,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ClientError {
    /// The service error code, if the server answered with one
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Whether the server rejected the call with `code`
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == Some(code.as_str())
    }
}
