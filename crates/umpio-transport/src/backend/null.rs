use std::time::Duration;

use umpio_codec::UmpPacket;

use super::Backend;
use crate::config::TransportConfig;
use crate::endpoint::{DiscoveredEndpoint, Endpoint};
use crate::error::{Error, Result};

/// Backend for hosts without a supported MIDI API.
///
/// Enumerates nothing and refuses to open.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl NullBackend {
    pub fn new(_config: &TransportConfig) -> Result<Self> {
        Ok(Self)
    }
}

impl Backend for NullBackend {
    type Handle = ();

    fn name(&self) -> &'static str {
        "null"
    }

    fn enumerate_outputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        Ok(Vec::new())
    }

    fn enumerate_inputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        Ok(Vec::new())
    }

    fn open(&self, endpoint: &Endpoint) -> Result<()> {
        Err(Error::unsupported(
            self.name(),
            "open",
            format!("no MIDI API available for '{}'", endpoint.name),
        ))
    }

    fn close(&self, _handle: ()) -> Result<()> {
        Ok(())
    }

    fn send(&self, _handle: &mut (), _packet: &UmpPacket) -> Result<()> {
        Err(Error::unsupported(self.name(), "send", "no MIDI API available"))
    }

    fn poll_receive(&self, _handle: &mut (), wait: Duration) -> Result<Option<Vec<u8>>> {
        std::thread::sleep(wait);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Direction, NativeId};

    #[test]
    fn test_null_enumerates_nothing() {
        let backend = NullBackend;
        assert!(backend.enumerate_outputs().unwrap().is_empty());
        assert!(backend.enumerate_inputs().unwrap().is_empty());
    }

    #[test]
    fn test_null_refuses_open() {
        let endpoint = Endpoint {
            index: 0,
            name: "Nothing".into(),
            direction: Direction::Output,
            native_id: NativeId::new("none"),
        };
        assert!(matches!(
            NullBackend.open(&endpoint),
            Err(Error::UnsupportedOnBackend { backend: "null", .. })
        ));
    }
}
