use std::time::Duration;

use serde::Deserialize;

use crate::transport::{FrameLimits, WireFormat};

/// Top-level configuration settings for the application.
///
/// Includes settings for the listening server, the broker and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the broker will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration settings for the broker.
///
/// Zero disables a limit (`max_connections`, `max_body_bytes`,
/// `max_topics_per_connection`) or a timeout (`read_timeout_secs`,
/// `send_timeout_secs`).
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub outbound_queue_capacity: usize,
    pub read_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub max_topics_per_connection: usize,
    pub wire_format: WireFormat,
}

impl BrokerSettings {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_body_bytes: non_zero(self.max_body_bytes),
            max_topics: non_zero(self.max_topics_per_connection),
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    /// How long a publisher waits for room in one subscriber's queue.
    pub fn send_timeout(&self) -> Option<Duration> {
        (self.send_timeout_secs > 0).then(|| Duration::from_secs(self.send_timeout_secs))
    }

    pub fn connection_limit(&self) -> Option<usize> {
        non_zero(self.max_connections)
    }

    /// mpsc channels panic on a zero capacity.
    pub fn queue_capacity(&self) -> usize {
        self.outbound_queue_capacity.max(1)
    }
}

fn non_zero(value: usize) -> Option<usize> {
    (value > 0).then_some(value)
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub outbound_queue_capacity: Option<usize>,
    pub read_timeout_secs: Option<u64>,
    pub send_timeout_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub max_topics_per_connection: Option<usize>,
    pub wire_format: Option<WireFormat>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8888,
            },
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            outbound_queue_capacity: 64,
            read_timeout_secs: 0,
            send_timeout_secs: 5,
            max_body_bytes: 64 * 1024 * 1024,
            max_topics_per_connection: 65_536,
            wire_format: WireFormat::Binary,
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let server = self.server;
        let broker = self.broker;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .as_ref()
                    .and_then(|b| b.max_connections)
                    .unwrap_or(default.broker.max_connections),
                outbound_queue_capacity: broker
                    .as_ref()
                    .and_then(|b| b.outbound_queue_capacity)
                    .unwrap_or(default.broker.outbound_queue_capacity),
                read_timeout_secs: broker
                    .as_ref()
                    .and_then(|b| b.read_timeout_secs)
                    .unwrap_or(default.broker.read_timeout_secs),
                send_timeout_secs: broker
                    .as_ref()
                    .and_then(|b| b.send_timeout_secs)
                    .unwrap_or(default.broker.send_timeout_secs),
                max_body_bytes: broker
                    .as_ref()
                    .and_then(|b| b.max_body_bytes)
                    .unwrap_or(default.broker.max_body_bytes),
                max_topics_per_connection: broker
                    .as_ref()
                    .and_then(|b| b.max_topics_per_connection)
                    .unwrap_or(default.broker.max_topics_per_connection),
                wire_format: broker
                    .as_ref()
                    .and_then(|b| b.wire_format)
                    .unwrap_or(default.broker.wire_format),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
