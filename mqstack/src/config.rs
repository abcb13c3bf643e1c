//! Configuration management

use mqstack_sqs::{QueueAttributes, SqsError, SqsState};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Attributes every new queue starts from
    #[serde(default)]
    pub queue_defaults: QueueAttributes,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Queues created at startup, in order
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct EngineConfig {
    /// Background visibility sweep period; 0 disables the sweeper.
    #[serde(default)]
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    pub name: String,

    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

fn default_port() -> u16 {
    9324
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    /// Load configuration from an optional file and `MQSTACK_*` environment
    /// variables (nested keys use `__`, e.g. `MQSTACK_SERVER__PORT`).
    ///
    /// An explicitly named file must exist; the default `mqstack.*` is
    /// optional.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("mqstack").required(false),
        };
        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("MQSTACK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config = config.try_deserialize::<Config>()?;
        config.queue_defaults.validate()?;
        Ok(config)
    }
}

/// Create the configured queues in order, so a dead-letter queue listed
/// before its sources can be referenced by them.
pub fn provision_queues(state: &SqsState, queues: &[QueueConfig]) -> Result<(), SqsError> {
    for queue in queues {
        state.create_queue(&queue.name, &queue.attributes)?;
        info!(queue = %queue.name, "Provisioned queue");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("");
        assert_eq!(config.server.port, 9324);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.queue_defaults, QueueAttributes::default());
        assert_eq!(config.engine.sweep_interval_ms, 0);
        assert!(config.queues.is_empty());
    }

    #[test]
    fn test_full_file() {
        let config = parse(
            r#"
            [server]
            port = 9400
            host = "127.0.0.1"

            [queue_defaults]
            visibility_timeout = 10
            receive_message_wait_time_seconds = 5

            [engine]
            sweep_interval_ms = 250

            [[queues]]
            name = "orders-dlq"

            [[queues]]
            name = "orders"

            [queues.attributes]
            VisibilityTimeout = "20"
            RedrivePolicy = '{"maxReceiveCount":3,"deadLetterTarget":"orders-dlq"}'
            "#,
        );
        assert_eq!(config.server.port, 9400);
        assert_eq!(config.queue_defaults.visibility_timeout, 10);
        assert_eq!(config.queue_defaults.receive_message_wait_time_seconds, 5);
        assert_eq!(config.queue_defaults.maximum_message_size, 262_144);
        assert_eq!(config.engine.sweep_interval_ms, 250);
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.queues[1].attributes["VisibilityTimeout"], "20");
    }

    #[test]
    fn test_provision_in_order() {
        let config = parse(
            r#"
            [[queues]]
            name = "dlq"

            [[queues]]
            name = "work"
            attributes = { RedrivePolicy = '{"maxReceiveCount":2,"deadLetterTarget":"dlq"}' }
            "#,
        );
        let state = SqsState::new();
        provision_queues(&state, &config.queues).unwrap();
        assert_eq!(state.list_queues(None), vec!["dlq", "work"]);
        assert_eq!(
            state.list_dead_letter_source_queues("dlq").unwrap(),
            vec!["work"]
        );
    }

    #[test]
    fn test_provision_rejects_forward_reference() {
        let config = parse(
            r#"
            [[queues]]
            name = "work"
            attributes = { RedrivePolicy = '{"maxReceiveCount":2,"deadLetterTarget":"dlq"}' }

            [[queues]]
            name = "dlq"
            "#,
        );
        let state = SqsState::new();
        assert!(matches!(
            provision_queues(&state, &config.queues),
            Err(SqsError::InvalidAttributeValue(_))
        ));
    }
}
