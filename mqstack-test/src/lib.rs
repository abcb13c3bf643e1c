//! Test utilities for mqstack
//!
//! Provides utilities for integration testing against a live queue service:
//! - Start an in-process server on a random local port
//! - A typed client for every queue operation
//! - Helpers for unique queue names and expected body digests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mqstack_test::{TestMessage, TestServer};
//!
//! #[tokio::test]
//! async fn test_round_trip() {
//!     let server = TestServer::start().await.unwrap();
//!     let client = server.client();
//!
//!     client.create_queue("orders").await.unwrap();
//!     let message = TestMessage::new("hello");
//!     client.send_message("orders", &message.body).await.unwrap();
//! }
//! ```

pub mod client;
pub mod server;

use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;

pub use client::{ClientError, MqClient, ReceiveRequest};
pub use server::{TestError, TestServer};

/// Timeout for waiting on the server to accept connections
pub const STARTUP_TIMEOUT_SECS: u64 = 10;

/// A message body together with the digest the service should report for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub body: String,
    pub md5: String,
}

impl TestMessage {
    pub fn new(body: impl Into<String>) -> Self {
        let body = body.into();
        let md5 = hex::encode(Md5::digest(body.as_bytes()));
        Self { body, md5 }
    }
}

/// Append a random suffix so tests sharing a server never collide.
pub fn queue_name_with_suffix(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

/// Install a tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mqstack_sqs=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
