//! Queue lifecycle over HTTP

use mqstack_core::ErrorCode;
use mqstack_test::{queue_name_with_suffix, TestServer};
use std::collections::HashMap;

#[tokio::test]
async fn test_create_queue_returns_name() {
    let server = TestServer::start().await.unwrap();
    let client = server.client();
    let name = queue_name_with_suffix("StandardQueue");

    let created = client.create_queue(&name).await.unwrap();
    assert_eq!(created, name);
    assert_eq!(client.get_queue(&name).await.unwrap(), name);
}

#[tokio::test]
async fn test_create_existing_queue_is_idempotent() {
    let server = TestServer::start().await.unwrap();
    let client = server.client();

    client.create_queue("repeat").await.unwrap();
    client.send_message("repeat", "kept").await.unwrap();
    client.create_queue("repeat").await.unwrap();

    assert_eq!(client.list_queues(None).await.unwrap(), vec!["repeat"]);
    let attrs = client
        .get_queue_attributes("repeat", &["ApproximateNumberOfMessages"])
        .await
        .unwrap();
    assert_eq!(attrs["ApproximateNumberOfMessages"], "1");
}

#[tokio::test]
async fn test_create_queue_with_attributes() {
    let server = TestServer::start().await.unwrap();
    let client = server.client();

    let attributes = HashMap::from([
        ("VisibilityTimeout".to_string(), "15".to_string()),
        ("ReceiveMessageWaitTimeSeconds".to_string(), "5".to_string()),
    ]);
    client
        .create_queue_with_attributes("configured", attributes)
        .await
        .unwrap();

    let attrs = client
        .get_queue_attributes("configured", &["All"])
        .await
        .unwrap();
    assert_eq!(attrs["VisibilityTimeout"], "15");
    assert_eq!(attrs["ReceiveMessageWaitTimeSeconds"], "5");
    assert_eq!(attrs["QueueName"], "configured");
}

#[tokio::test]
async fn test_invalid_queue_name_rejected() {
    let server = TestServer::start().await.unwrap();
    let client = server.client();

    let err = client.create_queue("has space").await.unwrap_err();
    assert!(err.is(ErrorCode::InvalidParameterValue), "{err}");

    let too_long = "q".repeat(81);
    let err = client.create_queue(&too_long).await.unwrap_err();
    assert!(err.is(ErrorCode::InvalidParameterValue), "{err}");
}

#[tokio::test]
async fn test_invalid_attribute_value_rejected() {
    let server = TestServer::start().await.unwrap();
    let client = server.client();

    let attributes = HashMap::from([("VisibilityTimeout".to_string(), "43201".to_string())]);
    let err = client
        .create_queue_with_attributes("bad", attributes)
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidAttributeValue), "{err}");
    assert!(client.list_queues(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_queues_by_prefix() {
    let server = TestServer::start().await.unwrap();
    let client = server.client();

    for name in ["orders", "orders-dlq", "payments"] {
        client.create_queue(name).await.unwrap();
    }

    assert_eq!(
        client.list_queues(Some("orders")).await.unwrap(),
        vec!["orders", "orders-dlq"]
    );
    assert_eq!(client.list_queues(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_delete_queue() {
    let server = TestServer::start().await.unwrap();
    let client = server.client();

    client.create_queue("doomed").await.unwrap();
    client.delete_queue("doomed").await.unwrap();

    let err = client.get_queue("doomed").await.unwrap_err();
    assert!(err.is(ErrorCode::QueueDoesNotExist), "{err}");
    let err = client.send_message("doomed", "late").await.unwrap_err();
    assert!(err.is(ErrorCode::QueueDoesNotExist), "{err}");
    assert!(server.state().list_queues(None).is_empty());
}
