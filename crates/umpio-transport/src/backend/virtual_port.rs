//! In-process endpoints.
//!
//! Outputs record what was sent; inputs deliver whatever is injected. The
//! backend is cheaply cloneable so a test can keep one copy for inspection
//! while the transport drives another.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;
use umpio_codec::UmpPacket;

use super::{legacy, Backend};
use crate::endpoint::{Direction, DiscoveredEndpoint, Endpoint, NativeId};
use crate::error::{Error, Result};

/// A packet that reached a virtual output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub endpoint: NativeId,
    pub packet: UmpPacket,
}

#[derive(Debug)]
struct VirtualPort {
    name: String,
    id: NativeId,
    direction: Direction,
    /// Inbound channels of the open handles on this port.
    listeners: Vec<(u64, Sender<Vec<u8>>)>,
}

#[derive(Debug, Default)]
struct VirtualState {
    ports: Vec<VirtualPort>,
    next_id: u64,
    sent: Vec<SentPacket>,
    open_handles: usize,
    send_delay: Duration,
    open_delay: Duration,
    close_delay: Duration,
    enumerate_delay: Duration,
    enumerations: usize,
    /// Sends left before every further send fails.
    sends_remaining: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
    legacy_only: bool,
}

/// Handle to an open virtual endpoint.
#[derive(Debug)]
pub struct VirtualHandle {
    id: u64,
    port: NativeId,
    inbound: Option<Receiver<Vec<u8>>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that only accepts what a MIDI 1.0 API could carry:
    /// single-word packets with a legacy byte form.
    pub fn legacy_only() -> Self {
        Self {
            legacy_only: true,
            ..Self::default()
        }
    }

    pub fn add_output(&self, name: impl Into<String>) -> NativeId {
        self.add_port(name.into(), Direction::Output)
    }

    pub fn add_input(&self, name: impl Into<String>) -> NativeId {
        self.add_port(name.into(), Direction::Input)
    }

    fn add_port(&self, name: String, direction: Direction) -> NativeId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = NativeId::new(format!("virtual:{}", state.next_id));
        debug!(name = %name, %direction, id = id.as_str(), "Added virtual port");
        state.ports.push(VirtualPort {
            name,
            id: id.clone(),
            direction,
            listeners: Vec::new(),
        });
        id
    }

    /// Unplug a port. Open handles stay valid but no longer receive.
    pub fn remove(&self, id: &NativeId) -> bool {
        let mut state = self.state.lock();
        let before = state.ports.len();
        state.ports.retain(|p| &p.id != id);
        state.ports.len() != before
    }

    /// Deliver raw big-endian UMP bytes to every open handle on input `id`.
    ///
    /// Returns how many handles received them.
    pub fn inject(&self, id: &NativeId, bytes: &[u8]) -> usize {
        let state = self.state.lock();
        let Some(port) = state.ports.iter().find(|p| &p.id == id) else {
            return 0;
        };
        port.listeners
            .iter()
            .filter(|(_, tx)| tx.send(bytes.to_vec()).is_ok())
            .count()
    }

    /// Convenience over [`inject`](Self::inject) for whole packets.
    pub fn inject_packets(&self, id: &NativeId, packets: &[UmpPacket]) -> usize {
        self.inject(id, &legacy::packets_to_bytes(packets))
    }

    /// Every packet sent so far, in backend order.
    pub fn sent(&self) -> Vec<SentPacket> {
        self.state.lock().sent.clone()
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    /// Make every send block for `delay` before completing.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = delay;
    }

    /// Make every open block for `delay` before completing.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = delay;
    }

    /// Make every close block for `delay` before releasing the handle.
    pub fn set_close_delay(&self, delay: Duration) {
        self.state.lock().close_delay = delay;
    }

    /// Make every enumeration block for `delay`.
    pub fn set_enumerate_delay(&self, delay: Duration) {
        self.state.lock().enumerate_delay = delay;
    }

    /// Number of `enumerate_*` calls made so far.
    pub fn enumerations(&self) -> usize {
        self.state.lock().enumerations
    }

    /// Let `count` more sends succeed, then fail every send after that.
    pub fn fail_sends_after(&self, count: usize) {
        self.state.lock().sends_remaining = Some(count);
    }

    fn list(&self, direction: Direction) -> Vec<DiscoveredEndpoint> {
        let delay = {
            let mut state = self.state.lock();
            state.enumerations += 1;
            state.enumerate_delay
        };
        pause(delay);
        self.state
            .lock()
            .ports
            .iter()
            .filter(|p| p.direction == direction)
            .map(|p| DiscoveredEndpoint::new(p.name.clone(), p.id.clone()))
            .collect()
    }
}

impl Backend for VirtualBackend {
    type Handle = VirtualHandle;

    fn name(&self) -> &'static str {
        "virtual"
    }

    fn enumerate_outputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        Ok(self.list(Direction::Output))
    }

    fn enumerate_inputs(&self) -> Result<Vec<DiscoveredEndpoint>> {
        Ok(self.list(Direction::Input))
    }

    fn open(&self, endpoint: &Endpoint) -> Result<VirtualHandle> {
        let delay = self.state.lock().open_delay;
        pause(delay);
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let Some(port) = state
            .ports
            .iter_mut()
            .find(|p| p.id == endpoint.native_id && p.direction == endpoint.direction)
        else {
            return Err(Error::io("open", &endpoint.name, None, "virtual port is gone"));
        };

        let inbound = (endpoint.direction == Direction::Input).then(|| {
            let (tx, rx) = crossbeam_channel::unbounded();
            port.listeners.push((id, tx));
            rx
        });
        state.open_handles += 1;

        Ok(VirtualHandle {
            id,
            port: endpoint.native_id.clone(),
            inbound,
        })
    }

    fn close(&self, handle: VirtualHandle) -> Result<()> {
        let delay = self.state.lock().close_delay;
        pause(delay);
        let mut state = self.state.lock();
        if let Some(port) = state.ports.iter_mut().find(|p| p.id == handle.port) {
            port.listeners.retain(|(id, _)| *id != handle.id);
        }
        state.open_handles = state.open_handles.saturating_sub(1);
        Ok(())
    }

    fn send(&self, handle: &mut VirtualHandle, packet: &UmpPacket) -> Result<()> {
        if self.legacy_only {
            legacy::packet_to_legacy(self.name(), packet)?;
        }

        let delay = self.state.lock().send_delay;
        pause(delay);

        let mut state = self.state.lock();
        match state.sends_remaining.as_mut() {
            Some(0) => {
                return Err(Error::io(
                    "send",
                    handle.port.as_str(),
                    None,
                    "virtual send failure",
                ))
            }
            Some(n) => *n -= 1,
            None => {}
        }
        state.sent.push(SentPacket {
            endpoint: handle.port.clone(),
            packet: *packet,
        });
        Ok(())
    }

    fn poll_receive(&self, handle: &mut VirtualHandle, wait: Duration) -> Result<Option<Vec<u8>>> {
        let Some(rx) = &handle.inbound else {
            std::thread::sleep(wait);
            return Ok(None);
        };
        match rx.recv_timeout(wait) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // Port removed; nothing will ever arrive.
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(wait);
                Ok(None)
            }
        }
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(backend: &VirtualBackend, direction: Direction, index: usize) -> Endpoint {
        let found = match direction {
            Direction::Output => backend.enumerate_outputs().unwrap(),
            Direction::Input => backend.enumerate_inputs().unwrap(),
        };
        let found = &found[index];
        Endpoint {
            index,
            name: found.name.clone(),
            direction,
            native_id: found.native_id.clone(),
        }
    }

    #[test]
    fn test_enumeration_by_direction() {
        let backend = VirtualBackend::new();
        backend.add_output("Out A");
        backend.add_input("In A");
        backend.add_output("Out B");

        let outputs: Vec<_> = backend
            .enumerate_outputs()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(outputs, vec!["Out A", "Out B"]);
        assert_eq!(backend.enumerate_inputs().unwrap().len(), 1);
    }

    #[test]
    fn test_send_records_packet() {
        let backend = VirtualBackend::new();
        let id = backend.add_output("Synth");
        let mut handle = backend.open(&endpoint(&backend, Direction::Output, 0)).unwrap();
        assert_eq!(backend.open_handles(), 1);

        let packet = UmpPacket::single(0x2090_3C40).unwrap();
        backend.send(&mut handle, &packet).unwrap();
        assert_eq!(
            backend.sent(),
            vec![SentPacket {
                endpoint: id,
                packet
            }]
        );

        backend.close(handle).unwrap();
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn test_inject_reaches_open_input() {
        let backend = VirtualBackend::new();
        let id = backend.add_input("Keys");
        assert_eq!(backend.inject(&id, &[0x20, 0x90, 0x3C, 0x40]), 0);

        let mut handle = backend.open(&endpoint(&backend, Direction::Input, 0)).unwrap();
        assert_eq!(backend.inject(&id, &[0x20, 0x90, 0x3C, 0x40]), 1);
        let bytes = backend
            .poll_receive(&mut handle, Duration::from_millis(100))
            .unwrap();
        assert_eq!(bytes, Some(vec![0x20, 0x90, 0x3C, 0x40]));
        assert_eq!(
            backend
                .poll_receive(&mut handle, Duration::from_millis(1))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_fail_sends_after() {
        let backend = VirtualBackend::new();
        backend.add_output("Synth");
        let mut handle = backend.open(&endpoint(&backend, Direction::Output, 0)).unwrap();
        backend.fail_sends_after(1);

        let packet = UmpPacket::single(0x2090_3C40).unwrap();
        backend.send(&mut handle, &packet).unwrap();
        assert!(matches!(
            backend.send(&mut handle, &packet),
            Err(Error::BackendIo { operation: "send", .. })
        ));
        assert_eq!(backend.send_count(), 1);
    }

    #[test]
    fn test_legacy_only_rejects_multi_word() {
        let backend = VirtualBackend::legacy_only();
        backend.add_output("Old Synth");
        let mut handle = backend.open(&endpoint(&backend, Direction::Output, 0)).unwrap();

        let wide = UmpPacket::from_words(&[0x4090_3C00, 0xFFFF_0000]).unwrap();
        assert!(matches!(
            backend.send(&mut handle, &wide),
            Err(Error::UnsupportedOnBackend { .. })
        ));
        assert_eq!(backend.send_count(), 0);
    }

    #[test]
    fn test_open_removed_port_fails() {
        let backend = VirtualBackend::new();
        let id = backend.add_output("Synth");
        let target = endpoint(&backend, Direction::Output, 0);
        assert!(backend.remove(&id));
        assert!(matches!(
            backend.open(&target),
            Err(Error::BackendIo { operation: "open", .. })
        ));
    }

    #[test]
    fn test_open_and_close_delays() {
        let backend = VirtualBackend::new();
        backend.add_output("Slow");
        let target = endpoint(&backend, Direction::Output, 0);
        backend.set_open_delay(Duration::from_millis(30));
        backend.set_close_delay(Duration::from_millis(30));

        let started = std::time::Instant::now();
        let handle = backend.open(&target).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(backend.open_handles(), 1);

        let started = std::time::Instant::now();
        backend.close(handle).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(backend.open_handles(), 0);
    }
}
