//! MIDI 2.0 UMP transport core.
//!
//! Enumerates the host's MIDI endpoints, opens exclusive sessions on them and
//! moves Universal MIDI Packets in both directions through the native API of
//! the platform (ALSA raw MIDI, CoreMIDI, or WinMM).
//!
//! Feature gates: `native` (OS backends, on by default). Without it the
//! platform backend enumerates nothing; [`VirtualBackend`] works everywhere.

pub mod error;
pub use error::{Error, Result};

pub mod backend;
pub use backend::{Backend, PlatformBackend, SentPacket, VirtualBackend};

mod capabilities;
pub use capabilities::{capabilities, Capabilities, Platform};

mod config;
pub use config::TransportConfig;

mod endpoint;
pub use endpoint::{Direction, DiscoveredEndpoint, Endpoint, NativeId};

mod registry;

mod session;
pub use session::{PacketListener, Session, SessionState, SysExListener, Subscription};

mod system;
pub use system::{UmpTransport, UmpTransportBuilder};

pub use umpio_codec::{SysExMessage, UmpPacket};
