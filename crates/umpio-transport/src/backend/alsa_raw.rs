//! Linux backend over ALSA raw MIDI.
//!
//! Endpoints are raw-MIDI sub-devices addressed as `hw:CARD,DEVICE,SUB`.
//! Names come from the control interface, so enumeration never opens a
//! device; each session owns exactly one non-blocking handle.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use alsa::card;
use alsa::ctl::Ctl;
use alsa::rawmidi::{self, Rawmidi};
use tracing::{debug, warn};
use umpio_codec::UmpPacket;

use super::Backend;
use crate::config::TransportConfig;
use crate::endpoint::{Direction, DiscoveredEndpoint, Endpoint, NativeId};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 256;
const WRITE_RETRY_INTERVAL: Duration = Duration::from_micros(200);
const READ_RETRY_INTERVAL: Duration = Duration::from_millis(1);

pub struct AlsaRawBackend {
    send_timeout: Duration,
}

/// An open raw-MIDI sub-device.
pub struct AlsaHandle {
    rawmidi: Rawmidi,
    endpoint: String,
}

// SAFETY: the rawmidi handle is owned by a single session worker and is only
// ever touched from that thread; ALSA rawmidi handles carry no thread
// affinity.
unsafe impl Send for AlsaHandle {}

impl AlsaRawBackend {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            send_timeout: config.send_timeout(),
        })
    }

    fn enumerate(&self, direction: Direction) -> Result<Vec<DiscoveredEndpoint>> {
        let stream = alsa_direction(direction);
        let mut found = Vec::new();

        for card in card::Iter::new() {
            let card = match card {
                Ok(card) => card,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable sound card");
                    continue;
                }
            };
            let ctl = match Ctl::from_card(&card, false) {
                Ok(ctl) => ctl,
                Err(e) => {
                    warn!(card = card.get_index(), error = %e, "Cannot open card control");
                    continue;
                }
            };

            for info in rawmidi::Iter::new(&ctl) {
                let info = match info {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(card = card.get_index(), error = %e, "Skipping raw MIDI entry");
                        continue;
                    }
                };
                if info.get_stream() != stream {
                    continue;
                }

                let id = format!(
                    "hw:{},{},{}",
                    card.get_index(),
                    info.get_device(),
                    info.get_subdevice()
                );
                let name = match info
                    .get_subdevice_name()
                    .ok()
                    .filter(|n| !n.is_empty())
                    .map_or_else(|| info.get_id(), Ok)
                {
                    Ok(name) => name,
                    Err(e) => {
                        warn!(id = %id, error = %e, "Skipping raw MIDI entry without a name");
                        continue;
                    }
                };
                found.push(DiscoveredEndpoint::new(name, NativeId::new(id)));
            }
        }

        Ok(found)
    }
}

fn alsa_direction(direction: Direction) -> alsa::Direction {
    match direction {
        Direction::Output => alsa::Direction::Playback,
        Direction::Input => alsa::Direction::Capture,
    }
}

fn alsa_error(operation: &'static str, endpoint: &str, e: &alsa::Error) -> Error {
    Error::io(operation, endpoint, Some(e.errno()), e.to_string())
}

fn io_error(operation: &'static str, endpoint: &str, e: &std::io::Error) -> Error {
    Error::io(operation, endpoint, e.raw_os_error(), e.to_string())
}

impl Backend for AlsaRawBackend {
    type Handle = AlsaHandle;

    fn name(&self) -> &'static str {
        "alsa"
    }

    fn enumerate_outputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        self.enumerate(Direction::Output)
    }

    fn enumerate_inputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        self.enumerate(Direction::Input)
    }

    fn open(&self, endpoint: &Endpoint) -> Result<AlsaHandle> {
        let id = endpoint.native_id.as_str();
        let rawmidi = Rawmidi::new(id, alsa_direction(endpoint.direction), true)
            .map_err(|e| alsa_error("open", id, &e))?;
        debug!(id, name = %endpoint.name, "Opened raw MIDI device");
        Ok(AlsaHandle {
            rawmidi,
            endpoint: id.to_string(),
        })
    }

    fn close(&self, handle: AlsaHandle) -> Result<()> {
        debug!(id = %handle.endpoint, "Closing raw MIDI device");
        drop(handle.rawmidi);
        Ok(())
    }

    fn send(&self, handle: &mut AlsaHandle, packet: &UmpPacket) -> Result<()> {
        let bytes = packet.to_be_bytes();
        let deadline = Instant::now() + self.send_timeout;
        let mut written = 0;
        let mut io = handle.rawmidi.io();

        while written < bytes.len() {
            match io.write(&bytes[written..]) {
                Ok(0) => {}
                Ok(n) => {
                    written += n;
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(io_error("send", &handle.endpoint, &e)),
            }
            if Instant::now() >= deadline {
                return Err(Error::BackendTimeout {
                    operation: "send",
                    endpoint: handle.endpoint.clone(),
                    timeout: self.send_timeout,
                });
            }
            std::thread::sleep(WRITE_RETRY_INTERVAL);
        }
        Ok(())
    }

    fn poll_receive(&self, handle: &mut AlsaHandle, wait: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + wait;
        let mut buf = [0u8; READ_CHUNK];
        let mut io = handle.rawmidi.io();

        loop {
            match io.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => return Ok(Some(buf[..n].to_vec())),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(io_error("receive", &handle.endpoint, &e)),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(READ_RETRY_INTERVAL);
        }
    }
}
