//! Native MIDI backends.
//!
//! Every backend exposes the same capability set through [`Backend`]; the
//! one matching the host OS is chosen at compile time as
//! [`PlatformBackend`]. [`VirtualBackend`] is available everywhere for
//! in-process endpoints and tests.
//!
//! Inbound data is always handed over as big-endian UMP words, whatever the
//! OS delivers natively.

use std::time::Duration;

use umpio_codec::UmpPacket;

use crate::endpoint::{DiscoveredEndpoint, Endpoint};
use crate::error::Result;

pub mod legacy;
mod null;
mod virtual_port;

pub use null::NullBackend;
pub use virtual_port::{SentPacket, VirtualBackend};

#[cfg(all(feature = "native", target_os = "linux"))]
mod alsa_raw;
#[cfg(all(feature = "native", target_os = "linux"))]
pub use alsa_raw::AlsaRawBackend;

#[cfg(all(feature = "native", target_os = "macos"))]
mod core_midi;
#[cfg(all(feature = "native", target_os = "macos"))]
pub use core_midi::CoreMidiBackend;

#[cfg(all(feature = "native", windows))]
mod winmm;
#[cfg(all(feature = "native", windows))]
pub use winmm::WinMmBackend;

#[cfg(all(feature = "native", target_os = "linux"))]
pub type PlatformBackend = AlsaRawBackend;

#[cfg(all(feature = "native", target_os = "macos"))]
pub type PlatformBackend = CoreMidiBackend;

#[cfg(all(feature = "native", windows))]
pub type PlatformBackend = WinMmBackend;

#[cfg(not(all(
    feature = "native",
    any(target_os = "linux", target_os = "macos", windows)
)))]
pub type PlatformBackend = NullBackend;

/// Uniform capability set over a native MIDI API.
///
/// A `Handle` is owned by exactly one session, which moves it onto its I/O
/// worker thread; the backend never keeps a copy.
pub trait Backend: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Entries whose details cannot be read are skipped, not fatal.
    fn enumerate_outputs(&self) -> Result<Vec<DiscoveredEndpoint>>;

    fn enumerate_inputs(&self) -> Result<Vec<DiscoveredEndpoint>>;

    fn open(&self, endpoint: &Endpoint) -> Result<Self::Handle>;

    fn close(&self, handle: Self::Handle) -> Result<()>;

    /// Transmit one whole packet.
    fn send(&self, handle: &mut Self::Handle, packet: &UmpPacket) -> Result<()>;

    /// Wait up to `wait` for inbound bytes. `Ok(None)` means nothing arrived.
    fn poll_receive(&self, handle: &mut Self::Handle, wait: Duration) -> Result<Option<Vec<u8>>>;
}
