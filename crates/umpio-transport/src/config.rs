//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`UmpTransport`](crate::UmpTransport).
///
/// Usually set through [`UmpTransportBuilder`](crate::UmpTransportBuilder);
/// derives serde so hosts can embed it in their own config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Client name announced to the OS MIDI subsystem.
    pub client_name: String,
    pub open_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Upper bound on how long an input worker waits for data before
    /// checking for close requests.
    pub poll_interval_ms: u64,
    /// Pending commands per session before `send` reports a timeout.
    pub command_queue_depth: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            client_name: "umpio".to_string(),
            open_timeout_ms: 2000,
            send_timeout_ms: 500,
            close_timeout_ms: 2000,
            poll_interval_ms: 5,
            command_queue_depth: 1024,
        }
    }
}

impl TransportConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"client_name":"host","send_timeout_ms":50}"#).unwrap();
        assert_eq!(config.client_name, "host");
        assert_eq!(config.send_timeout(), Duration::from_millis(50));
        assert_eq!(config.open_timeout_ms, TransportConfig::default().open_timeout_ms);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = TransportConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
