use serde::{Deserialize, Serialize};

/// Bus construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Namespace prefix concatenated (no separator) in front of every channel
    /// name the bus creates.
    #[serde(default)]
    pub prefix: String,

    /// Transport host, for transports that dial. The in-memory transport
    /// ignores it.
    #[serde(default = "default_host")]
    pub host: String,

    /// Transport port, for transports that dial.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of the broadcast streams (message delivery and error
    /// fan-out) owned by the bus and its channels.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_buffer_size() -> usize {
    1024
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            host: default_host(),
            port: default_port(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl BusConfig {
    /// Default settings with the given namespace prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}
