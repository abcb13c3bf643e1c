//! Full lifecycle through the HTTP surface

use mqstack_sqs::handlers::WireMessageAttribute;
use mqstack_test::{init_tracing, queue_name_with_suffix, ReceiveRequest, TestMessage, TestServer};

#[tokio::test]
async fn test_create_send_receive_delete_with_message_attributes() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = server.client();
    let queue = queue_name_with_suffix("StandardQueue-CoreEndToEndTest");

    assert_eq!(client.create_queue(&queue).await.unwrap(), queue);

    let message = TestMessage::new("This is a simple message");
    client
        .send_message_with_attributes(
            &queue,
            &message.body,
            vec![WireMessageAttribute::string("Custom", "Custom Data")],
        )
        .await
        .unwrap();

    let received = client
        .receive(
            ReceiveRequest::new(queue.as_str())
                .wait_time_seconds(10)
                .message_attribute_names(&["Custom"]),
        )
        .await
        .unwrap();
    assert_eq!(received.len(), 1);
    let first = &received[0];
    assert_eq!(first.body, message.body);
    assert_eq!(first.md5_of_body, message.md5);
    assert_eq!(first.message_attributes.len(), 1);
    assert_eq!(
        first.message_attributes[0].string_value.as_deref(),
        Some("Custom Data")
    );

    client
        .delete_message(&queue, &first.receipt_handle)
        .await
        .unwrap();
    assert!(client.receive_message(&queue).await.unwrap().is_empty());

    client.delete_queue(&queue).await.unwrap();
    assert!(client.list_queues(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start().await.unwrap();
    let response = reqwest::get(format!("{}/health", server.url())).await.unwrap();
    assert!(response.status().is_success());
    assert!(server.port() > 0);
}

#[tokio::test]
async fn test_unknown_operation() {
    let server = TestServer::start().await.unwrap();
    let err = server
        .client()
        .call::<_, serde_json::Value>("Frobnicate", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("UnknownOperation"));
}
