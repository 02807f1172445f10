//! The transport facade.
//!
//! ## Quick Start
//!
//! ```ignore
//! use umpio_transport::UmpTransport;
//!
//! let transport = UmpTransport::builder().client_name("my-host").build()?;
//!
//! for endpoint in transport.list_outputs() {
//!     println!("{}: {}", endpoint.index, endpoint.name);
//! }
//!
//! let synth = transport.open_output(0)?;
//! transport.send_packet(&synth, &[0x2090_3C40])?;
//! transport.send_sysex(&synth, &[0x7E, 0x7F, 0x06, 0x01])?;
//! transport.close_output(0)?;
//! ```

mod builder;

pub use builder::UmpTransportBuilder;

use std::sync::Arc;

use tracing::{debug, warn};
use umpio_codec::UmpPacket;

use crate::backend::{Backend, PlatformBackend};
use crate::capabilities::{self, Capabilities};
use crate::config::TransportConfig;
use crate::endpoint::{Direction, Endpoint};
use crate::error::Result;
use crate::registry::Registry;
use crate::session::{Session, SessionManager, SessionState, Subscription};

// ============================================================================
// UmpTransport - Main Entry Point
// ============================================================================

/// MIDI 2.0 UMP transport over one backend.
///
/// Owns the endpoint catalog and every session opened through it.
/// Clone is cheap (Arc internally).
pub struct UmpTransport<B: Backend = PlatformBackend> {
    inner: Arc<UmpTransportInner<B>>,
}

impl<B: Backend> Clone for UmpTransport<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct UmpTransportInner<B: Backend> {
    pub(crate) registry: Arc<Registry<B>>,
    pub(crate) sessions: SessionManager<B>,
    pub(crate) config: TransportConfig,
}

impl<B: Backend> Drop for UmpTransportInner<B> {
    fn drop(&mut self) {
        if let Err(e) = self.sessions.shutdown() {
            warn!(error = %e, "Session close failed while dropping transport");
        }
    }
}

impl UmpTransport {
    /// Create a transport builder.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let transport = UmpTransport::builder()
    ///     .send_timeout(Duration::from_millis(100))
    ///     .build()?;
    /// ```
    pub fn builder() -> UmpTransportBuilder {
        UmpTransportBuilder::default()
    }
}

impl<B: Backend> UmpTransport<B> {
    pub(crate) fn from_parts(backend: Arc<B>, config: TransportConfig) -> Self {
        let registry = Arc::new(Registry::new(backend));
        let sessions = SessionManager::new(Arc::clone(&registry), config.clone());
        Self {
            inner: Arc::new(UmpTransportInner {
                registry,
                sessions,
                config,
            }),
        }
    }

    pub fn backend(&self) -> &B {
        self.inner.registry.backend()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    // ==================== Discovery ====================

    /// Outputs as of the last refresh.
    pub fn list_outputs(&self) -> Vec<Endpoint> {
        self.inner.registry.list(Direction::Output)
    }

    /// Inputs as of the last refresh.
    pub fn list_inputs(&self) -> Vec<Endpoint> {
        self.inner.registry.list(Direction::Input)
    }

    /// Re-enumerate endpoints.
    ///
    /// Indices are reassigned; open sessions keep working and are flagged
    /// [`SessionState::Stale`] if their endpoint disappeared. Concurrent
    /// callers share one enumeration.
    pub fn refresh(&self) -> Result<()> {
        self.inner.registry.refresh().map(|_| ())
    }

    /// First output whose name contains `name`, case-insensitively.
    pub fn find_output(&self, name: &str) -> Option<Endpoint> {
        self.inner.registry.find(Direction::Output, name)
    }

    pub fn find_input(&self, name: &str) -> Option<Endpoint> {
        self.inner.registry.find(Direction::Input, name)
    }

    // ==================== Sessions ====================

    pub fn open_output(&self, index: usize) -> Result<Session> {
        self.inner.sessions.open(index, Direction::Output)
    }

    pub fn open_input(&self, index: usize) -> Result<Session> {
        self.inner.sessions.open(index, Direction::Input)
    }

    /// Close the session on output `index`. Closing twice is fine; an index
    /// outside the catalog is [`Error::DeviceNotFound`](crate::Error::DeviceNotFound).
    pub fn close_output(&self, index: usize) -> Result<()> {
        self.inner.sessions.close(index, Direction::Output)
    }

    pub fn close_input(&self, index: usize) -> Result<()> {
        self.inner.sessions.close(index, Direction::Input)
    }

    /// Close every session whose endpoint disappeared in a refresh.
    ///
    /// Stale sessions have no index any more, so this is the way to release
    /// them without holding on to each [`Session`]. Returns how many closed.
    pub fn close_stale(&self) -> Result<usize> {
        self.inner.sessions.close_stale()
    }

    /// The open session on output `index`, if any.
    pub fn output_session(&self, index: usize) -> Option<Session> {
        self.inner.sessions.get(index, Direction::Output)
    }

    pub fn input_session(&self, index: usize) -> Option<Session> {
        self.inner.sessions.get(index, Direction::Input)
    }

    /// State of whatever session holds `endpoint`.
    pub fn session_state(&self, endpoint: &Endpoint) -> SessionState {
        self.inner.registry.state_of(endpoint)
    }

    pub fn open_session_count(&self) -> usize {
        self.inner.sessions.open_count()
    }

    // ==================== I/O ====================

    /// Send one packet given as raw words.
    pub fn send_packet(&self, session: &Session, words: &[u32]) -> Result<()> {
        let packet = UmpPacket::from_words(words)?;
        session.send(&packet)
    }

    pub fn send_sysex(&self, session: &Session, payload: &[u8]) -> Result<()> {
        session.send_sysex(payload)
    }

    /// Listen for inbound packets on `session`.
    pub fn on_packet<F>(&self, session: &Session, listener: F) -> Result<Subscription>
    where
        F: Fn(&UmpPacket) + Send + Sync + 'static,
    {
        session.subscribe(listener)
    }

    // ==================== Capabilities ====================

    pub fn capabilities(&self) -> &'static Capabilities {
        capabilities::capabilities()
    }

    // ==================== Shutdown ====================

    /// Close every open session.
    pub fn shutdown(&self) -> Result<()> {
        debug!(backend = self.backend().name(), "Shutting down transport");
        self.inner.sessions.shutdown()
    }
}

impl<B: Backend> std::fmt::Debug for UmpTransport<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UmpTransport")
            .field("backend", &self.backend().name())
            .field("open_sessions", &self.open_session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;
    use crate::error::Error;

    fn transport() -> (VirtualBackend, UmpTransport<VirtualBackend>) {
        let backend = VirtualBackend::new();
        backend.add_output("Synth");
        backend.add_input("Keys");
        let transport = UmpTransport::builder().build_with(backend.clone()).unwrap();
        (backend, transport)
    }

    #[test]
    fn test_build_enumerates() {
        let (_backend, transport) = transport();
        assert_eq!(transport.list_outputs().len(), 1);
        assert_eq!(transport.list_inputs().len(), 1);
    }

    #[test]
    fn test_send_packet_rejects_bad_word_count() {
        let (_backend, transport) = transport();
        let session = transport.open_output(0).unwrap();
        assert!(matches!(
            transport.send_packet(&session, &[0x2090_3C40, 0]),
            Err(Error::Codec(_))
        ));
        transport.shutdown().unwrap();
    }

    #[test]
    fn test_output_session_lookup() {
        let (_backend, transport) = transport();
        assert!(transport.output_session(0).is_none());
        let session = transport.open_output(0).unwrap();
        assert!(transport.output_session(0).is_some());
        session.close().unwrap();
        assert!(transport.output_session(0).is_none());
    }

    #[test]
    fn test_send_on_input_is_unsupported() {
        let (_backend, transport) = transport();
        let session = transport.open_input(0).unwrap();
        assert!(matches!(
            transport.send_packet(&session, &[0x2090_3C40]),
            Err(Error::UnsupportedOnBackend { .. })
        ));
        transport.close_input(0).unwrap();
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let (backend, transport) = transport();
        let out = transport.open_output(0).unwrap();
        let input = transport.open_input(0).unwrap();
        assert_eq!(transport.open_session_count(), 2);
        assert_eq!(backend.open_handles(), 2);

        transport.shutdown().unwrap();
        assert_eq!(out.state(), SessionState::Closed);
        assert_eq!(input.state(), SessionState::Closed);
        assert_eq!(backend.open_handles(), 0);
    }
}
