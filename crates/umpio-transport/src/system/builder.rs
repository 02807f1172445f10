//! UmpTransport builder for configuring timeouts and the backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::{Backend, PlatformBackend};
use crate::config::TransportConfig;
use crate::error::Result;

use super::UmpTransport;

#[derive(Debug, Clone, Default)]
pub struct UmpTransportBuilder {
    pub(super) config: TransportConfig,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl UmpTransportBuilder {
    /// Start from a complete configuration, e.g. one loaded from a file.
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout_ms = millis(timeout);
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout_ms = millis(timeout);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout_ms = millis(timeout);
        self
    }

    /// How often input workers check for a close request while idle.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = millis(interval);
        self
    }

    pub fn command_queue_depth(mut self, depth: usize) -> Self {
        self.config.command_queue_depth = depth;
        self
    }

    /// Build over the backend for this platform and enumerate endpoints.
    pub fn build(self) -> Result<UmpTransport> {
        let backend = PlatformBackend::new(&self.config)?;
        self.build_with(backend)
    }

    /// Build over a caller-supplied backend, such as a
    /// [`VirtualBackend`](crate::backend::VirtualBackend).
    pub fn build_with<B: Backend>(self, backend: B) -> Result<UmpTransport<B>> {
        info!(
            backend = backend.name(),
            client = %self.config.client_name,
            "Starting UMP transport"
        );
        let transport = UmpTransport::from_parts(Arc::new(backend), self.config);
        transport.refresh()?;
        Ok(transport)
    }
}
