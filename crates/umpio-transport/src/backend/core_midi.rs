//! macOS backend over CoreMIDI.
//!
//! One client and output port serve the whole process. They are created on
//! first use and released when the backend is dropped. Inputs get a port of
//! their own whose callback feeds the session worker through a channel.
//! Endpoints are identified by their CoreMIDI unique id, which stays with a
//! device across refreshes.

use std::sync::Arc;
use std::time::Duration;

use coremidi::{
    Client, Destination, Destinations, EventBuffer, EventList, InputPortWithContext, OutputPort,
    Protocol, Source, Sources,
};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, warn};
use umpio_codec::UmpPacket;

use super::Backend;
use crate::config::TransportConfig;
use crate::endpoint::{Direction, DiscoveredEndpoint, Endpoint, NativeId};
use crate::error::{Error, Result};

/// Process-wide CoreMIDI client state.
struct CoreMidiContext {
    client: Client,
    output: OutputPort,
}

// SAFETY: CoreMIDI client and port references are thread-safe handles into
// the MIDI server; the context never hands out mutable access.
unsafe impl Send for CoreMidiContext {}
unsafe impl Sync for CoreMidiContext {}

pub struct CoreMidiBackend {
    client_name: String,
    context: Mutex<Option<Arc<CoreMidiContext>>>,
}

/// An open destination or connected source.
pub struct CoreMidiHandle(HandleKind);

enum HandleKind {
    Output {
        context: Arc<CoreMidiContext>,
        destination: Destination,
        endpoint: String,
    },
    Input {
        _port: InputPortWithContext<()>,
        inbound: Receiver<Vec<u8>>,
    },
}

// SAFETY: endpoint and port references are plain MIDI server object ids.
unsafe impl Send for HandleKind {}

impl CoreMidiBackend {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            client_name: config.client_name.clone(),
            context: Mutex::new(None),
        })
    }

    /// The shared client, created on the first call.
    fn context(&self) -> Result<Arc<CoreMidiContext>> {
        let mut slot = self.context.lock();
        if let Some(context) = slot.as_ref() {
            return Ok(Arc::clone(context));
        }

        let client = Client::new(&self.client_name).map_err(|status| {
            Error::io("create client", &self.client_name, Some(status), "MIDIClientCreate failed")
        })?;
        let output = client
            .output_port(&format!("{} out", self.client_name))
            .map_err(|status| {
                Error::io("create port", &self.client_name, Some(status), "MIDIOutputPortCreate failed")
            })?;
        debug!(client = %self.client_name, "Created CoreMIDI client");

        let context = Arc::new(CoreMidiContext { client, output });
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Named destinations, keyed by their CoreMIDI unique id.
    fn destinations() -> Vec<(Destination, DiscoveredEndpoint)> {
        (0..Destinations::count())
            .filter_map(|i| {
                let destination = Destination::from_index(i)?;
                let found =
                    describe("destination", i, destination.display_name(), destination.unique_id())?;
                Some((destination, found))
            })
            .collect()
    }

    fn sources() -> Vec<(Source, DiscoveredEndpoint)> {
        (0..Sources::count())
            .filter_map(|i| {
                let source = Source::from_index(i)?;
                let found = describe("source", i, source.display_name(), source.unique_id())?;
                Some((source, found))
            })
            .collect()
    }

    /// The entry still carrying `endpoint`'s unique id. A device that was
    /// unplugged and replaced never matches, even under the same name.
    fn lookup<T>(endpoint: &Endpoint, entries: Vec<(T, DiscoveredEndpoint)>) -> Result<T> {
        entries
            .into_iter()
            .find(|(_, found)| found.native_id == endpoint.native_id)
            .map(|(entry, _)| entry)
            .ok_or_else(|| Error::io("open", &endpoint.name, None, "endpoint is no longer present"))
    }

    fn open_output(&self, endpoint: &Endpoint) -> Result<CoreMidiHandle> {
        let destination = Self::lookup(endpoint, Self::destinations())?;

        Ok(CoreMidiHandle(HandleKind::Output {
            context: self.context()?,
            destination,
            endpoint: endpoint.name.clone(),
        }))
    }

    fn open_input(&self, endpoint: &Endpoint) -> Result<CoreMidiHandle> {
        let source = Self::lookup(endpoint, Self::sources())?;

        let context = self.context()?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut port = context
            .client
            .input_port_with_protocol(
                &format!("{} in", endpoint.name),
                Protocol::Midi20,
                move |events: &EventList, _: &mut ()| {
                    for event in events.iter() {
                        let bytes: Vec<u8> =
                            event.data().iter().flat_map(|w| w.to_be_bytes()).collect();
                        let _ = tx.send(bytes);
                    }
                },
            )
            .map_err(|status| {
                Error::io("open", &endpoint.name, Some(status), "MIDIInputPortCreate failed")
            })?;
        port.connect_source(&source, ()).map_err(|status| {
            Error::io("open", &endpoint.name, Some(status), "MIDIPortConnectSource failed")
        })?;

        Ok(CoreMidiHandle(HandleKind::Input {
            _port: port,
            inbound: rx,
        }))
    }
}

impl Backend for CoreMidiBackend {
    type Handle = CoreMidiHandle;

    fn name(&self) -> &'static str {
        "coremidi"
    }

    fn enumerate_outputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        Ok(Self::destinations().into_iter().map(|(_, found)| found).collect())
    }

    fn enumerate_inputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        Ok(Self::sources().into_iter().map(|(_, found)| found).collect())
    }

    fn open(&self, endpoint: &Endpoint) -> Result<CoreMidiHandle> {
        match endpoint.direction {
            Direction::Output => self.open_output(endpoint),
            Direction::Input => self.open_input(endpoint),
        }
    }

    fn close(&self, handle: CoreMidiHandle) -> Result<()> {
        // Dropping an input port disconnects it from its source.
        drop(handle);
        Ok(())
    }

    fn send(&self, handle: &mut CoreMidiHandle, packet: &UmpPacket) -> Result<()> {
        let HandleKind::Output {
            context,
            destination,
            endpoint,
        } = &handle.0
        else {
            return Err(Error::unsupported(self.name(), "send", "endpoint is an input"));
        };

        let buffer = EventBuffer::new(Protocol::Midi20).with_packet(0, packet.words());
        context
            .output
            .send(destination, &buffer)
            .map_err(|status| Error::io("send", endpoint.as_str(), Some(status), "MIDISendEventList failed"))
    }

    fn poll_receive(&self, handle: &mut CoreMidiHandle, wait: Duration) -> Result<Option<Vec<u8>>> {
        match &handle.0 {
            HandleKind::Input { inbound, .. } => Ok(inbound.recv_timeout(wait).ok()),
            HandleKind::Output { .. } => {
                std::thread::sleep(wait);
                Ok(None)
            }
        }
    }
}

/// Catalog entry for one CoreMIDI endpoint, or `None` (logged) when its name
/// or unique id cannot be read.
fn describe(
    kind: &'static str,
    index: usize,
    name: Option<String>,
    unique_id: Option<u32>,
) -> Option<DiscoveredEndpoint> {
    match (name, unique_id) {
        (Some(name), Some(unique_id)) => Some(DiscoveredEndpoint::new(
            name,
            NativeId::new(format!("coremidi:{unique_id}")),
        )),
        _ => {
            warn!(kind, index, "Skipping endpoint without a name or unique id");
            None
        }
    }
}

impl Drop for CoreMidiBackend {
    fn drop(&mut self) {
        if self.context.lock().take().is_some() {
            debug!(client = %self.client_name, "Releasing CoreMIDI client");
        }
    }
}
