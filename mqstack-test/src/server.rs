//! Test server management

use axum::{
    routing::{get, post},
    Router,
};
use mqstack_sqs::SqsState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::client::MqClient;
use crate::STARTUP_TIMEOUT_SECS;

/// A queue service running inside the test process on a random local port.
///
/// The server task is aborted when the value is dropped.
pub struct TestServer {
    state: Arc<SqsState>,
    addr: SocketAddr,
    base_url: String,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with default queue attributes
    pub async fn start() -> Result<Self, TestError> {
        Self::with_state(Arc::new(SqsState::new())).await
    }

    /// Start a server over an existing engine, e.g. one with custom defaults
    pub async fn with_state(state: Arc<SqsState>) -> Result<Self, TestError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| TestError::StartFailed(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TestError::StartFailed(e.to_string()))?;

        let app = Router::new()
            .route("/health", get(|| async { "running" }))
            .route("/", post(mqstack_sqs::handle_request))
            .with_state(Arc::clone(&state));

        info!(%addr, "Starting mqstack test server");
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Test server stopped");
            }
        });

        let server = Self {
            state,
            addr,
            base_url: format!("http://{addr}"),
            task,
        };
        server.wait_ready().await?;
        Ok(server)
    }

    async fn wait_ready(&self) -> Result<(), TestError> {
        let health = format!("{}/health", self.base_url);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(STARTUP_TIMEOUT_SECS);

        while tokio::time::Instant::now() < deadline {
            if let Ok(response) = reqwest::get(&health).await {
                if response.status().is_success() {
                    info!(addr = %self.addr, "mqstack test server ready");
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Err(TestError::StartupTimeout)
    }

    /// Get the base URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The engine behind the server, for assertions that bypass HTTP
    pub fn state(&self) -> &Arc<SqsState> {
        &self.state
    }

    /// Get a client bound to this server
    pub fn client(&self) -> MqClient {
        MqClient::new(self.base_url.clone())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Errors that can occur with test server
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("Failed to start server: {0}")]
    StartFailed(String),

    #[error("Server startup timed out")]
    StartupTimeout,
}
