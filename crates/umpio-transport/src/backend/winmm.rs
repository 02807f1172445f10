//! Windows backend over WinMM, through midir.
//!
//! WinMM is a MIDI 1.0 API: outbound packets must have a legacy 1-3 byte
//! form, inbound legacy messages are converted to UMP before they reach the
//! session worker.
//!
//! WinMM has no stable device identifier, so endpoints are keyed by display
//! name and occurrence (`name#n`). Two devices with the same name cannot be
//! told apart across a refresh: after one of them is unplugged the registry
//! marks every session in that name group stale, and a reopen by index may
//! land on the remaining device.

use std::time::Duration;

use crossbeam_channel::Receiver;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, warn};
use umpio_codec::UmpPacket;

use super::{legacy, Backend};
use crate::config::TransportConfig;
use crate::endpoint::{name_occurrence_ids, Direction, DiscoveredEndpoint, Endpoint};
use crate::error::{Error, Result};

pub struct WinMmBackend {
    client_name: String,
}

/// An open WinMM connection.
pub struct WinMmHandle(Connection);

enum Connection {
    Output {
        connection: MidiOutputConnection,
        endpoint: String,
    },
    Input {
        connection: MidiInputConnection<()>,
        inbound: Receiver<Vec<u8>>,
    },
}

// SAFETY: the connection is created on, used from, and closed by the owning
// session worker only.
unsafe impl Send for Connection {}

impl WinMmBackend {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            client_name: config.client_name.clone(),
        })
    }

    fn output_client(&self) -> Result<MidiOutput> {
        MidiOutput::new(&self.client_name)
            .map_err(|e| Error::io("init", &self.client_name, None, e.to_string()))
    }

    fn input_client(&self) -> Result<MidiInput> {
        MidiInput::new(&self.client_name)
            .map_err(|e| Error::io("init", &self.client_name, None, e.to_string()))
    }

    /// Readable port names paired with their ports, unreadable ones skipped.
    fn named<P>(ports: Vec<P>, name_of: impl Fn(&P) -> Option<String>) -> Vec<(String, P)> {
        ports
            .into_iter()
            .enumerate()
            .filter_map(|(i, port)| match name_of(&port) {
                Some(name) => Some((name, port)),
                None => {
                    warn!(index = i, "Skipping MIDI port without a name");
                    None
                }
            })
            .collect()
    }

    fn discovered<P>(named: &[(String, P)]) -> Vec<DiscoveredEndpoint> {
        let ids = name_occurrence_ids(named.iter().map(|(n, _)| n.as_str()));
        named
            .iter()
            .zip(ids)
            .map(|((name, _), id)| DiscoveredEndpoint::new(name.clone(), id))
            .collect()
    }

    fn take_port<P>(endpoint: &Endpoint, named: Vec<(String, P)>) -> Result<P> {
        let ids = name_occurrence_ids(named.iter().map(|(n, _)| n.as_str()));
        let position = ids
            .iter()
            .position(|id| *id == endpoint.native_id)
            .ok_or_else(|| Error::io("open", &endpoint.name, None, "endpoint is no longer present"))?;
        named
            .into_iter()
            .nth(position)
            .map(|(_, port)| port)
            .ok_or_else(|| Error::io("open", &endpoint.name, None, "endpoint is no longer present"))
    }

    fn open_output(&self, endpoint: &Endpoint) -> Result<WinMmHandle> {
        let client = self.output_client()?;
        let named = Self::named(client.ports(), |p| client.port_name(p).ok());
        let port = Self::take_port(endpoint, named)?;
        let connection = client
            .connect(&port, &self.client_name)
            .map_err(|e| Error::io("open", &endpoint.name, None, e.to_string()))?;
        debug!(name = %endpoint.name, "Opened WinMM output");
        Ok(WinMmHandle(Connection::Output {
            connection,
            endpoint: endpoint.name.clone(),
        }))
    }

    fn open_input(&self, endpoint: &Endpoint) -> Result<WinMmHandle> {
        let mut client = self.input_client()?;
        client.ignore(Ignore::None);
        let named = Self::named(client.ports(), |p| client.port_name(p).ok());
        let port = Self::take_port(endpoint, named)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let name = endpoint.name.clone();
        let connection = client
            .connect(
                &port,
                &self.client_name,
                move |_timestamp, bytes, _| match legacy::legacy_to_packets(bytes) {
                    Ok(packets) => {
                        let _ = tx.send(legacy::packets_to_bytes(&packets));
                    }
                    Err(e) => warn!(endpoint = %name, error = %e, "Dropping inbound MIDI message"),
                },
                (),
            )
            .map_err(|e| Error::io("open", &endpoint.name, None, e.to_string()))?;
        debug!(name = %endpoint.name, "Opened WinMM input");
        Ok(WinMmHandle(Connection::Input {
            connection,
            inbound: rx,
        }))
    }
}

impl Backend for WinMmBackend {
    type Handle = WinMmHandle;

    fn name(&self) -> &'static str {
        "winmm"
    }

    fn enumerate_outputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        let client = self.output_client()?;
        let named = Self::named(client.ports(), |p| client.port_name(p).ok());
        Ok(Self::discovered(&named))
    }

    fn enumerate_inputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        let client = self.input_client()?;
        let named = Self::named(client.ports(), |p| client.port_name(p).ok());
        Ok(Self::discovered(&named))
    }

    fn open(&self, endpoint: &Endpoint) -> Result<WinMmHandle> {
        match endpoint.direction {
            Direction::Output => self.open_output(endpoint),
            Direction::Input => self.open_input(endpoint),
        }
    }

    fn close(&self, handle: WinMmHandle) -> Result<()> {
        match handle.0 {
            Connection::Output { connection, .. } => {
                connection.close();
            }
            Connection::Input { connection, .. } => {
                connection.close();
            }
        }
        Ok(())
    }

    fn send(&self, handle: &mut WinMmHandle, packet: &UmpPacket) -> Result<()> {
        let Connection::Output {
            connection,
            endpoint,
        } = &mut handle.0
        else {
            return Err(Error::unsupported(self.name(), "send", "endpoint is an input"));
        };
        let bytes = legacy::packet_to_legacy(self.name(), packet)?;
        connection
            .send(&bytes)
            .map_err(|e| Error::io("send", endpoint.as_str(), None, e.to_string()))
    }

    fn poll_receive(&self, handle: &mut WinMmHandle, wait: Duration) -> Result<Option<Vec<u8>>> {
        match &handle.0 {
            Connection::Input { inbound, .. } => Ok(inbound.recv_timeout(wait).ok()),
            Connection::Output { .. } => {
                std::thread::sleep(wait);
                Ok(None)
            }
        }
    }
}
