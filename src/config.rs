// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Settings are read from an optional `config/broker` file and from
//! `BROKER__<SECTION>__<KEY>` environment variables, for example
//! `BROKER__DELIVERY__PREFETCH=10`. Every field has a default.

use crate::{delivery::RequeuePosition, errors::BrokerError};
use ::config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub app: AppConfig,
    pub rabbitmq: RabbitMQConfig,
    pub delivery: DeliveryConfig,
    pub rpc: RpcConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            name: "broker".to_owned(),
        }
    }
}

/// Connection details for the AMQP transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Heartbeat interval in seconds
    pub heartbeat: u16,
}

impl Default for RabbitMQConfig {
    fn default() -> Self {
        RabbitMQConfig {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            heartbeat: 60,
        }
    }
}

/// Delivery tracking defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Prefetch used by subscriptions that do not set one
    pub prefetch: u16,
    /// Redeliveries granted to a nacked message before it is dead-lettered
    pub max_redeliveries: u32,
    pub requeue_position: RequeuePosition,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            prefetch: 1,
            max_redeliveries: 1,
            requeue_position: RequeuePosition::Head,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub request_queue: String,
    pub timeout_ms: u64,
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            request_queue: "rpc_queue".to_owned(),
            timeout_ms: 5000,
        }
    }
}

impl BrokerConfig {
    /// Loads the configuration from the default file and the environment.
    pub fn load() -> Result<Self, BrokerError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/broker").required(false))
            .add_source(
                Environment::with_prefix("BROKER")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::load_from(builder)
    }

    /// Builds the configuration from caller-provided sources.
    pub fn load_from(builder: ConfigBuilder<DefaultState>) -> Result<Self, BrokerError> {
        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::config::FileFormat;

    #[test]
    fn defaults() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.rabbitmq.host, "localhost");
        assert_eq!(cfg.rabbitmq.port, 5672);
        assert_eq!(cfg.rabbitmq.vhost, "/");
        assert_eq!(cfg.delivery.prefetch, 1);
        assert_eq!(cfg.delivery.max_redeliveries, 1);
        assert_eq!(cfg.delivery.requeue_position, RequeuePosition::Head);
        assert_eq!(cfg.rpc.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_sources_keep_defaults() {
        let builder = Config::builder().add_source(File::from_str(
            r#"{ "delivery": { "prefetch": 10, "requeue_position": "tail" },
                 "rabbitmq": { "host": "rabbit" } }"#,
            FileFormat::Json,
        ));

        let cfg = BrokerConfig::load_from(builder).unwrap();
        assert_eq!(cfg.delivery.prefetch, 10);
        assert_eq!(cfg.delivery.requeue_position, RequeuePosition::Tail);
        assert_eq!(cfg.delivery.max_redeliveries, 1);
        assert_eq!(cfg.rabbitmq.host, "rabbit");
        assert_eq!(cfg.rabbitmq.user, "guest");
        assert_eq!(cfg.rpc.request_queue, "rpc_queue");
    }

    #[test]
    fn bad_values_are_config_errors() {
        let builder = Config::builder().add_source(File::from_str(
            r#"{ "delivery": { "prefetch": "lots" } }"#,
            FileFormat::Json,
        ));
        assert!(matches!(
            BrokerConfig::load_from(builder),
            Err(BrokerError::ConfigError(_))
        ));
    }
}
